//! GPU-visible records.
//!
//! Every struct here is `#[repr(C)]` and `Pod`, mirrors a WGSL struct in
//! `shaders/prepare.wgsl` field for field, and is uploaded with
//! `bytemuck::cast_slice`. Links between records are slot indices, `-1`
//! meaning "none".

use bytemuck::{Pod, Zeroable};

/// Maximum LODs per archetype.
pub const MAX_INSTANCE_LODS: usize = 8;

/// Bits of the packed key that hold the LOD index.
pub const LOD_BITS: u32 = 3;

/// Mask selecting the LOD index from a packed key.
pub const LOD_MASK: u32 = (1 << LOD_BITS) - 1;

/// Archetype ids must stay below this so no packed key equals [`SENTINEL_KEY`].
pub const MAX_PACKED_ARCHETYPES: u32 = u32::MAX >> LOD_BITS;

/// Key of padding entries in the sort buffer. Sorts after every real key.
pub const SENTINEL_KEY: u32 = u32::MAX;

/// "No slot" value for GPU links.
pub const NO_LINK: i32 = -1;

const _: () = assert!(MAX_INSTANCE_LODS == 1 << LOD_BITS);

/// Packs an (archetype, lod) pair into an ascending sort key.
#[inline]
#[must_use]
pub const fn pack_key(archetype: u32, lod: u32) -> u32 {
    (archetype << LOD_BITS) | (lod & LOD_MASK)
}

/// Splits a packed key back into (archetype, lod).
#[inline]
#[must_use]
pub const fn unpack_key(key: u32) -> (u32, u32) {
    (key >> LOD_BITS, key & LOD_MASK)
}

/// Index of the bound slot for an (archetype, lod) pair.
#[inline]
#[must_use]
pub const fn bound_slot(archetype: u32, lod: u32) -> usize {
    archetype as usize * MAX_INSTANCE_LODS + lod as usize
}

/// Converts an optional slot into a GPU link.
#[inline]
#[must_use]
pub fn link(slot: Option<grim_core::SlotId>) -> i32 {
    slot.map_or(NO_LINK, |s| s.raw() as i32)
}

/// Per-archetype head of the LOD chain.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuLodList {
    /// First LodInfo slot (finest LOD), or -1.
    pub first_lod: i32,
    /// LODs linked from `first_lod`.
    pub lod_count: u32,
    /// Batches across all LODs. Zero means nothing to draw.
    pub batch_count: u32,
    /// Padding for 16-byte stride.
    pub _pad: u32,
}

impl GpuLodList {
    /// Free or not-yet-built slot.
    pub const EMPTY: Self = Self {
        first_lod: NO_LINK,
        lod_count: 0,
        batch_count: 0,
        _pad: 0,
    };
}

/// One LOD level.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuLodInfo {
    /// Distance at which this LOD takes over.
    pub switch_distance: f32,
    /// First IndexedBatch slot of this LOD.
    pub first_batch: i32,
    /// Next (coarser) LodInfo slot, or -1.
    pub next: i32,
    /// Batches linked from `first_batch`.
    pub batch_count: u32,
}

impl GpuLodInfo {
    /// Free slot.
    pub const EMPTY: Self = Self {
        switch_distance: 0.0,
        first_batch: NO_LINK,
        next: NO_LINK,
        batch_count: 0,
    };
}

/// One indexed draw range.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuIndexedBatch {
    /// First index in the archetype's index buffer.
    pub first_index: u32,
    /// Number of indices.
    pub index_count: u32,
    /// Next batch of the same LOD, or -1.
    pub next: i32,
    /// DrawInfo slot that issues this batch.
    pub draw_info: u32,
}

impl GpuIndexedBatch {
    /// Free slot.
    pub const EMPTY: Self = Self {
        first_index: 0,
        index_count: 0,
        next: NO_LINK,
        draw_info: u32::MAX,
    };
}

/// One row of the raw instance population handed over by the allocator.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct InstanceRecord {
    /// Allocator-owned instance id, written to the instance-id buffer.
    pub instance_id: u32,
    /// Archetype slot.
    pub archetype: u32,
    /// LOD chosen upstream (distance banding).
    pub lod: u32,
    /// Padding for 16-byte stride.
    pub _pad: u32,
}

impl InstanceRecord {
    /// Creates a record.
    #[must_use]
    pub const fn new(instance_id: u32, archetype: u32, lod: u32) -> Self {
        Self {
            instance_id,
            archetype,
            lod,
            _pad: 0,
        }
    }
}

/// A surviving instance with its sort key.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuInstanceInfo {
    /// `pack_key(archetype, lod)`.
    pub packed_key: u32,
    /// Instance id.
    pub instance_id: u32,
}

impl GpuInstanceInfo {
    /// Padding entry for the power-of-two sort buffer.
    pub const SENTINEL: Self = Self {
        packed_key: SENTINEL_KEY,
        instance_id: u32::MAX,
    };

    /// Archetype part of the key.
    #[inline]
    #[must_use]
    pub const fn archetype(&self) -> u32 {
        unpack_key(self.packed_key).0
    }

    /// LOD part of the key.
    #[inline]
    #[must_use]
    pub const fn lod(&self) -> u32 {
        unpack_key(self.packed_key).1
    }
}

/// `[first, last)` run of the sorted instance array for one (archetype, lod).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuInstanceBound {
    /// First sorted index of the run.
    pub first: u32,
    /// One past the last sorted index of the run.
    pub last: u32,
    /// Archetype, or -1 when the bucket is empty this frame.
    pub arch_idx: i32,
    /// LOD index of the run.
    pub lod_index: u32,
}

impl GpuInstanceBound {
    /// Bucket with no instances this frame.
    pub const EMPTY: Self = Self {
        first: 0,
        last: 0,
        arch_idx: NO_LINK,
        lod_index: 0,
    };

    /// True if the bucket holds instances.
    #[inline]
    #[must_use]
    pub const fn is_populated(&self) -> bool {
        self.arch_idx >= 0
    }

    /// Instances in the run.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.last.saturating_sub(self.first)
    }

    /// True if the run holds no instances.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Indexed indirect draw arguments, in the layout `draw_indexed_indirect` reads.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct DrawIndexedIndirectArgs {
    /// Indices per instance.
    pub index_count: u32,
    /// Number of instances to draw.
    pub instance_count: u32,
    /// First index.
    pub first_index: u32,
    /// Base vertex.
    pub base_vertex: i32,
    /// First instance, i.e. offset into the instance-id buffer.
    pub first_instance: u32,
}

impl DrawIndexedIndirectArgs {
    /// Size of one command in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Byte offset of the command for a batch slot.
    #[inline]
    #[must_use]
    pub const fn offset_of(batch_slot: u32) -> u64 {
        batch_slot as u64 * Self::SIZE
    }
}
