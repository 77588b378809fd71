//! Archetype descriptions.
//!
//! What a caller hands to `create_archetype`: which GPU buffers hold the
//! mesh, how vertices are laid out, and the LOD / group / sub-mesh tree the
//! batches are derived from.

use std::sync::Arc;

use crate::error::{GrimError, GrimResult};
use crate::gpu_types::MAX_INSTANCE_LODS;

/// Host-owned GPU buffer, resolved through [`crate::BufferProvider`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

/// Host-owned material, resolved through [`crate::MaterialSystem`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u32);

/// Identity of a vertex layout. Draws with equal ids share pipeline state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexFormatId(pub u32);

/// One vertex buffer slot of a vertex format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexStreamLayout {
    /// Bytes between consecutive elements.
    pub stride: u64,
    /// Per-vertex or per-instance stepping.
    pub step_mode: wgpu::VertexStepMode,
}

/// A vertex layout: one entry per vertex buffer slot.
///
/// The first per-instance stream is fed the compacted instance-id buffer at
/// draw time; every other stream is fed from the archetype's own buffers,
/// in slot order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexFormat {
    /// Identity used for draw grouping.
    pub id: VertexFormatId,
    /// Buffer slots.
    pub streams: Vec<VertexStreamLayout>,
}

impl VertexFormat {
    /// Slot that receives instance ids.
    #[must_use]
    pub fn instance_stream_slot(&self) -> Option<u32> {
        self.streams
            .iter()
            .position(|s| s.step_mode == wgpu::VertexStepMode::Instance)
            .map(|slot| slot as u32)
    }

    /// Number of slots fed from archetype buffers.
    #[must_use]
    pub fn mesh_stream_count(&self) -> usize {
        self.streams.len().saturating_sub(usize::from(self.instance_stream_slot().is_some()))
    }
}

/// One indexed range drawn with one material.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubMesh {
    /// First index.
    pub first_index: u32,
    /// Index count.
    pub index_count: u32,
    /// Index into [`ArchetypeDesc::materials`].
    pub material_slot: u32,
    /// Primitive topology.
    pub topology: wgpu::PrimitiveTopology,
}

/// A body/material group: sub-meshes that are toggled together.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MeshGroup {
    /// Sub-meshes of the group.
    pub sub_meshes: Vec<SubMesh>,
}

/// One LOD of the source mesh.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshLod {
    /// Distance at which this LOD takes over.
    pub switch_distance: f32,
    /// Groups, selected by [`ArchetypeDesc::group_mask`].
    pub groups: Vec<MeshGroup>,
}

/// Source mesh structure, finest LOD first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshSource {
    /// LOD levels.
    pub lods: Vec<MeshLod>,
}

/// Everything needed to create an archetype.
#[derive(Clone, Debug)]
pub struct ArchetypeDesc {
    /// One buffer per non-instance stream of `vertex_format`, in slot order.
    pub vertex_streams: Vec<BufferId>,
    /// Index buffer shared by all batches.
    pub index_buffer: Option<BufferId>,
    /// Index element type.
    pub index_format: wgpu::IndexFormat,
    /// Vertex layout.
    pub vertex_format: Arc<VertexFormat>,
    /// LOD / group / sub-mesh tree.
    pub mesh: Arc<MeshSource>,
    /// Bit `i` selects group `i` of every LOD.
    pub group_mask: u64,
    /// Material group, indexed by [`SubMesh::material_slot`].
    pub materials: Vec<MaterialId>,
}

impl ArchetypeDesc {
    /// Description selecting every group, with 32-bit indices.
    #[must_use]
    pub fn new(
        vertex_streams: Vec<BufferId>,
        index_buffer: BufferId,
        vertex_format: Arc<VertexFormat>,
        mesh: Arc<MeshSource>,
        materials: Vec<MaterialId>,
    ) -> Self {
        Self {
            vertex_streams,
            index_buffer: Some(index_buffer),
            index_format: wgpu::IndexFormat::Uint32,
            vertex_format,
            mesh,
            group_mask: u64::MAX,
            materials,
        }
    }

    /// Restricts the selected groups.
    #[must_use]
    pub fn with_group_mask(mut self, group_mask: u64) -> Self {
        self.group_mask = group_mask;
        self
    }

    /// True if group `index` is selected.
    #[inline]
    #[must_use]
    pub fn selects_group(&self, index: usize) -> bool {
        index < 64 && (self.group_mask >> index) & 1 == 1
    }

    /// Checks the description for content errors.
    ///
    /// # Errors
    ///
    /// Missing buffers, a vertex format without an instance stream, too many
    /// LODs, or a sub-mesh naming a material slot the group lacks.
    pub fn validate(&self) -> GrimResult<()> {
        if self.vertex_streams.is_empty() {
            return Err(GrimError::NoVertexStreams);
        }
        if self.index_buffer.is_none() {
            return Err(GrimError::NoIndexBuffer);
        }
        if self.vertex_format.instance_stream_slot().is_none() {
            return Err(GrimError::MissingInstanceStream(self.vertex_format.id.0));
        }
        let expected = self.vertex_format.mesh_stream_count();
        if self.vertex_streams.len() != expected {
            return Err(GrimError::StreamCountMismatch {
                expected,
                supplied: self.vertex_streams.len(),
            });
        }
        if self.mesh.lods.len() > MAX_INSTANCE_LODS {
            return Err(GrimError::TooManyLods {
                count: self.mesh.lods.len(),
                max: MAX_INSTANCE_LODS,
            });
        }

        let sub_meshes = self
            .mesh
            .lods
            .iter()
            .flat_map(|lod| lod.groups.iter())
            .flat_map(|group| group.sub_meshes.iter());
        for sub_mesh in sub_meshes {
            if sub_mesh.material_slot as usize >= self.materials.len() {
                return Err(GrimError::MaterialSlotOutOfRange {
                    slot: sub_mesh.material_slot,
                    len: self.materials.len(),
                });
            }
        }

        Ok(())
    }
}

/// The immutable part of an archetype shared by all of its draw records.
#[derive(Debug, PartialEq, Eq)]
pub struct ArchetypeInfo {
    /// Buffers for the non-instance streams, in slot order.
    pub vertex_streams: Vec<BufferId>,
    /// Index buffer.
    pub index_buffer: BufferId,
    /// Index element type.
    pub index_format: wgpu::IndexFormat,
    /// Vertex layout.
    pub vertex_format: Arc<VertexFormat>,
    /// Slot fed with the instance-id buffer.
    pub instance_slot: u32,
}

impl ArchetypeInfo {
    /// Extracts the shared part of a validated description.
    pub(crate) fn from_desc(desc: &ArchetypeDesc) -> Option<Self> {
        Some(Self {
            vertex_streams: desc.vertex_streams.clone(),
            index_buffer: desc.index_buffer?,
            index_format: desc.index_format,
            vertex_format: Arc::clone(&desc.vertex_format),
            instance_slot: desc.vertex_format.instance_stream_slot()?,
        })
    }

    /// Archetype buffer bound at `slot`, or None for the instance slot.
    #[must_use]
    pub fn stream_for_slot(&self, slot: u32) -> Option<BufferId> {
        match slot.cmp(&self.instance_slot) {
            std::cmp::Ordering::Less => self.vertex_streams.get(slot as usize).copied(),
            std::cmp::Ordering::Equal => None,
            std::cmp::Ordering::Greater => self.vertex_streams.get(slot as usize - 1).copied(),
        }
    }
}
