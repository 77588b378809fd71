//! Dense GPU-layout copies of the registry pools.
//!
//! Rebuilt on sync whenever a pool changed. The same arrays are uploaded for
//! the compute path and walked directly by the software path, so both read
//! identical link structures.

use crate::gpu_types::{GpuIndexedBatch, GpuLodInfo, GpuLodList};

/// Flattened registry pools, indexed by slot id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolMirror {
    /// One entry per archetype slot.
    pub lod_lists: Vec<GpuLodList>,
    /// One entry per LodInfo slot.
    pub lod_infos: Vec<GpuLodInfo>,
    /// One entry per IndexedBatch slot.
    pub batches: Vec<GpuIndexedBatch>,
}

impl PoolMirror {
    /// LodList of an archetype slot, if the slot is in range.
    #[inline]
    #[must_use]
    pub fn lod_list(&self, archetype: u32) -> Option<&GpuLodList> {
        self.lod_lists.get(archetype as usize)
    }

    /// Batches an archetype can draw. Zero for free or empty slots.
    #[inline]
    #[must_use]
    pub fn batch_count(&self, archetype: u32) -> u32 {
        self.lod_list(archetype).map_or(0, |list| list.batch_count)
    }

    /// Clamps a requested LOD to the last one the archetype has.
    ///
    /// None if the archetype has no LODs.
    #[inline]
    #[must_use]
    pub fn clamp_lod(&self, archetype: u32, lod: u32) -> Option<u32> {
        let list = self.lod_list(archetype)?;
        (list.lod_count > 0).then(|| lod.min(list.lod_count - 1))
    }

    /// LodInfo slot for a (clamped) LOD of an archetype.
    #[must_use]
    pub fn lod_slot(&self, archetype: u32, lod: u32) -> Option<u32> {
        let list = self.lod_list(archetype)?;
        let lod = self.clamp_lod(archetype, lod)?;
        let mut cursor = list.first_lod;
        for _ in 0..lod {
            cursor = self.lod_infos.get(usize::try_from(cursor).ok()?)?.next;
        }
        u32::try_from(cursor).ok()
    }

    /// Batch slots of a (clamped) LOD, in link order.
    pub fn lod_batches(&self, archetype: u32, lod: u32) -> impl Iterator<Item = (u32, &GpuIndexedBatch)> {
        let first = self
            .lod_slot(archetype, lod)
            .and_then(|slot| self.lod_infos.get(slot as usize))
            .map_or(-1, |info| info.first_batch);
        let limit = self.batches.len();

        let mut cursor = first;
        std::iter::from_fn(move || {
            let slot = u32::try_from(cursor).ok()?;
            let batch = self.batches.get(slot as usize)?;
            cursor = batch.next;
            Some((slot, batch))
        })
        .take(limit)
    }
}
