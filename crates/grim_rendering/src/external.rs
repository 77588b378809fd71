//! Boundaries to the host engine.
//!
//! The renderer never owns instances, materials or mesh buffers. It reads
//! them through these traits.

use crate::archetype::{ArchetypeHandle, BufferId, MaterialId, VertexFormat};
use crate::gpu_types::InstanceRecord;

/// Material flag: never drawn. Checked when an archetype is built.
pub const MATERIAL_INVISIBLE: u32 = 1 << 0;
/// Material flag: belongs to the transparent class.
pub const MATERIAL_TRANSPARENT: u32 = 1 << 1;

/// The external instance allocator.
pub trait InstanceAllocator {
    /// Instance slots the allocator can hand out.
    fn instance_slots_count(&self) -> u32;

    /// Instances currently assigned.
    fn instance_count(&self) -> u32;

    /// Instances currently assigned to one archetype.
    fn instance_count_by_archetype(&self, archetype: ArchetypeHandle) -> u32;

    /// The surviving population, one row per instance.
    fn instances(&self) -> &[InstanceRecord];
}

/// The external material system.
pub trait MaterialSystem {
    /// Flag bits (`MATERIAL_*`) of a material.
    fn flags(&self, material: MaterialId) -> u32;

    /// Debug name, used by the debug material filter.
    fn name(&self, material: MaterialId) -> Option<&str>;

    /// Hook run before pipeline setup. May substitute or drop the material.
    fn before_setup(&self, material: MaterialId) -> Option<MaterialId> {
        Some(material)
    }

    /// Configures pipeline and bind-group state on `pass` for drawing
    /// `material` with the given vertex layout and topology.
    ///
    /// Returns false if the pipeline is unavailable; the whole group is then
    /// skipped.
    fn setup<'a>(
        &'a self,
        pass: &mut wgpu::RenderPass<'a>,
        material: MaterialId,
        vertex_format: &VertexFormat,
        topology: wgpu::PrimitiveTopology,
    ) -> bool;
}

/// Resolves host buffer ids to GPU buffers.
pub trait BufferProvider {
    /// The buffer, or None if it is gone.
    fn buffer(&self, id: BufferId) -> Option<&wgpu::Buffer>;
}
