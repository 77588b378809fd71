//! # Archetype Registry
//!
//! Owns every archetype's sub-tree:
//!
//! ```text
//! LodList (slot = archetype id)
//!   └─► LodInfo ─► LodInfo ─► ...          (finest to coarsest)
//!         └─► IndexedBatch ─► IndexedBatch (one per visible sub-mesh)
//!               └─► DrawInfo
//! ```
//!
//! ## Two-phase lifecycle
//!
//! `create` and `destroy` may be called from any thread. They only touch
//! the pending queues and the archetype slot allocator, under one short
//! lock. [`ArchetypeRegistry::sync`] swaps the queues out under that lock
//! and then mutates the pools without holding it: destructions first,
//! then constructions.

use std::sync::Arc;

use grim_core::{BitSet, SlotAllocator, SlotId, SlotPool};
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use super::desc::{ArchetypeDesc, ArchetypeInfo, MaterialId};
use super::mirror::PoolMirror;
use crate::config::GrimConfig;
use crate::error::{GrimError, GrimResult};
use crate::external::{MaterialSystem, MATERIAL_INVISIBLE};
use crate::gpu_types::{link, GpuIndexedBatch, GpuLodInfo, GpuLodList};

/// Stable archetype id. Equal to its LodList slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeHandle(u32);

impl ArchetypeHandle {
    /// Returned nowhere by the registry; usable by hosts as "no archetype".
    pub const INVALID: Self = Self(u32::MAX);

    /// Wraps a raw id.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw id, as stored in instance records.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Id as an index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// False for [`ArchetypeHandle::INVALID`].
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }

    const fn slot(self) -> SlotId {
        SlotId::from_raw(self.0)
    }
}

/// Head of an archetype's LOD chain.
#[derive(Debug, Clone, Default)]
pub struct LodList {
    /// Finest built LOD.
    pub first_lod: Option<SlotId>,
    /// LODs in the chain.
    pub lod_count: u32,
    /// Batches across all LODs.
    pub batch_count: u32,
    /// Shared buffers and layout. None until built.
    pub info: Option<Arc<ArchetypeInfo>>,
}

/// One LOD level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodInfo {
    /// Distance at which this LOD takes over.
    pub switch_distance: f32,
    /// First batch.
    pub first_batch: Option<SlotId>,
    /// Next coarser LOD.
    pub next: Option<SlotId>,
    /// Batches in this LOD.
    pub batch_count: u32,
}

/// One indexed draw range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedBatch {
    /// First index.
    pub first_index: u32,
    /// Index count.
    pub index_count: u32,
    /// Next batch of the same LOD.
    pub next: Option<SlotId>,
    /// Draw record issuing this batch.
    pub draw_info: Option<SlotId>,
}

/// The renderable unit: one batch of one archetype with one material.
#[derive(Debug, Clone)]
pub struct DrawInfo {
    /// Owning archetype.
    pub archetype: ArchetypeHandle,
    /// Shared buffers and layout of the archetype.
    pub info: Arc<ArchetypeInfo>,
    /// Material of the sub-mesh.
    pub material: MaterialId,
    /// Primitive topology.
    pub topology: wgpu::PrimitiveTopology,
    /// Batch slot. Also the indirect command slot.
    pub batch: SlotId,
    /// LOD the batch belongs to.
    pub lod: u32,
}

/// What a sync did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Built archetypes torn down.
    pub destroyed: u32,
    /// Archetypes built.
    pub created: u32,
    /// Creations destroyed before they were built.
    pub cancelled: u32,
    /// Creations that ran out of pool space.
    pub failed: u32,
    /// True if any pool changed and the GPU copies are stale.
    pub pools_changed: bool,
}

impl SyncReport {
    /// True if the sync changed nothing.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.destroyed == 0
            && self.created == 0
            && self.cancelled == 0
            && self.failed == 0
            && !self.pools_changed
    }
}

struct PendingCreate {
    handle: ArchetypeHandle,
    desc: ArchetypeDesc,
}

struct PendingState {
    slots: SlotAllocator,
    creates: Vec<PendingCreate>,
    destroys: Vec<ArchetypeHandle>,
}

/// Cloneable handle for queueing archetype creation and destruction from
/// any thread.
#[derive(Clone)]
pub struct ArchetypeRequests {
    pending: Arc<Mutex<PendingState>>,
}

impl ArchetypeRequests {
    /// Validates `desc`, reserves an archetype slot and queues the build.
    ///
    /// The returned handle is stable immediately; its batches appear after
    /// the next sync.
    ///
    /// # Errors
    ///
    /// Content errors from [`ArchetypeDesc::validate`], or `PoolExhausted`
    /// when every archetype slot is taken.
    pub fn create(&self, desc: ArchetypeDesc) -> GrimResult<ArchetypeHandle> {
        if let Err(e) = desc.validate() {
            error!(error = %e, "rejected archetype description");
            return Err(e);
        }

        let mut state = self.pending.lock();
        let Some(slot) = state.slots.allocate() else {
            let capacity = state.slots.capacity();
            drop(state);
            error!(capacity, "archetype slots exhausted");
            return Err(GrimError::PoolExhausted { pool: "lod list", capacity });
        };
        let handle = ArchetypeHandle(slot.raw());
        state.creates.push(PendingCreate { handle, desc });
        drop(state);

        trace!(archetype = handle.raw(), "archetype creation queued");
        Ok(handle)
    }

    /// Queues destruction. The slot stays reserved until the next sync.
    pub fn destroy(&self, handle: ArchetypeHandle) {
        if !handle.is_valid() {
            warn!("destroy of invalid archetype handle ignored");
            return;
        }
        self.pending.lock().destroys.push(handle);
        trace!(archetype = handle.raw(), "archetype destruction queued");
    }

    /// True if creations or destructions are waiting for a sync.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        let state = self.pending.lock();
        !state.creates.is_empty() || !state.destroys.is_empty()
    }
}

/// Slots reserved while building one archetype, released on failure.
#[derive(Default)]
struct BuildSlots {
    lods: Vec<SlotId>,
    batches: Vec<SlotId>,
    draws: Vec<SlotId>,
}

/// Registry of archetypes and their LOD / batch / draw pools.
pub struct ArchetypeRegistry {
    requests: ArchetypeRequests,
    lod_lists: Box<[LodList]>,
    /// Archetypes whose sub-tree is built.
    live: BitSet,
    lod_list_high_water: u32,
    lod_list_revision: u64,
    lod_infos: SlotPool<LodInfo>,
    batches: SlotPool<IndexedBatch>,
    draw_infos: SlotPool<DrawInfo>,
    mirror: PoolMirror,
    mirrored_revision: u64,
}

impl ArchetypeRegistry {
    /// Creates an empty registry with the configured pool capacities.
    ///
    /// # Panics
    ///
    /// Panics if a capacity is zero. [`GrimConfig::validate`] rejects that.
    #[must_use]
    pub fn new(config: &GrimConfig) -> Self {
        let max_archetypes = config.max_archetypes;
        let state = PendingState {
            slots: SlotAllocator::new(max_archetypes),
            creates: Vec::new(),
            destroys: Vec::new(),
        };

        Self {
            requests: ArchetypeRequests {
                pending: Arc::new(Mutex::new(state)),
            },
            lod_lists: (0..max_archetypes).map(|_| LodList::default()).collect(),
            live: BitSet::new(max_archetypes as usize),
            lod_list_high_water: 0,
            lod_list_revision: 0,
            lod_infos: SlotPool::new(config.max_lod_infos),
            batches: SlotPool::new(config.max_batches),
            draw_infos: SlotPool::new(config.max_draw_infos),
            mirror: PoolMirror::default(),
            mirrored_revision: 0,
        }
    }

    /// Handle for other threads.
    #[must_use]
    pub fn requests(&self) -> ArchetypeRequests {
        self.requests.clone()
    }

    /// See [`ArchetypeRequests::create`].
    ///
    /// # Errors
    ///
    /// As [`ArchetypeRequests::create`].
    pub fn create_archetype(&self, desc: ArchetypeDesc) -> GrimResult<ArchetypeHandle> {
        self.requests.create(desc)
    }

    /// See [`ArchetypeRequests::destroy`].
    pub fn destroy_archetype(&self, handle: ArchetypeHandle) {
        self.requests.destroy(handle);
    }

    /// Applies queued destructions, then queued creations.
    ///
    /// Must run once per frame on the thread that records rendering work,
    /// before preparing or drawing.
    pub fn sync<M: MaterialSystem + ?Sized>(&mut self, materials: &M) -> SyncReport {
        let (mut creates, destroys) = {
            let mut state = self.requests.pending.lock();
            (
                std::mem::take(&mut state.creates),
                std::mem::take(&mut state.destroys),
            )
        };

        let mut report = SyncReport::default();
        let mut released = Vec::new();

        for handle in destroys {
            if let Some(pos) = creates.iter().position(|c| c.handle == handle) {
                creates.remove(pos);
                released.push(handle);
                report.cancelled += 1;
            } else if self.live.contains(handle.index()) {
                self.free_subtree(handle);
                released.push(handle);
                report.destroyed += 1;
            } else {
                warn!(archetype = handle.raw(), "destroy of unknown archetype ignored");
            }
        }

        for PendingCreate { handle, desc } in creates {
            match self.build(handle, &desc, materials) {
                Ok(batches) => {
                    report.created += 1;
                    trace!(archetype = handle.raw(), batches, "archetype built");
                }
                Err(e) => {
                    error!(archetype = handle.raw(), error = %e, "archetype build failed");
                    released.push(handle);
                    report.failed += 1;
                }
            }
        }

        if !released.is_empty() {
            let mut state = self.requests.pending.lock();
            for handle in released {
                state.slots.free(handle.slot());
            }
        }

        let revision = self.pool_revision();
        report.pools_changed = revision != self.mirrored_revision;
        if report.pools_changed {
            self.rebuild_mirror();
            self.mirrored_revision = revision;
        }

        if !report.is_noop() {
            debug!(
                created = report.created,
                destroyed = report.destroyed,
                cancelled = report.cancelled,
                failed = report.failed,
                pools_changed = report.pools_changed,
                "archetypes synced"
            );
        }
        report
    }

    /// Builds the LOD / batch / draw sub-tree of one archetype.
    ///
    /// Sub-meshes with invisible materials get no batch, and LODs left with
    /// no batch are not linked. Returns the batch count.
    fn build<M: MaterialSystem + ?Sized>(
        &mut self,
        handle: ArchetypeHandle,
        desc: &ArchetypeDesc,
        materials: &M,
    ) -> GrimResult<u32> {
        let info = Arc::new(ArchetypeInfo::from_desc(desc).ok_or(GrimError::NoIndexBuffer)?);
        let mut slots = BuildSlots::default();

        match self.build_lods(handle, desc, &info, materials, &mut slots) {
            Ok((first_lod, lod_count, batch_count)) => {
                self.lod_lists[handle.index()] = LodList {
                    first_lod,
                    lod_count,
                    batch_count,
                    info: Some(info),
                };
                self.live.insert(handle.index());
                self.lod_list_high_water = self.lod_list_high_water.max(handle.raw() + 1);
                self.lod_list_revision += 1;
                Ok(batch_count)
            }
            Err(e) => {
                for slot in slots.draws {
                    self.draw_infos.remove(slot);
                }
                for slot in slots.batches {
                    self.batches.remove(slot);
                }
                for slot in slots.lods {
                    self.lod_infos.remove(slot);
                }
                Err(e)
            }
        }
    }

    fn build_lods<M: MaterialSystem + ?Sized>(
        &mut self,
        handle: ArchetypeHandle,
        desc: &ArchetypeDesc,
        info: &Arc<ArchetypeInfo>,
        materials: &M,
        slots: &mut BuildSlots,
    ) -> GrimResult<(Option<SlotId>, u32, u32)> {
        let mut first_lod = None;
        let mut prev_lod: Option<SlotId> = None;
        let mut lod_count = 0u32;
        let mut total_batches = 0u32;

        for source_lod in &desc.mesh.lods {
            let mut first_batch = None;
            let mut prev_batch: Option<SlotId> = None;
            let mut batch_count = 0u32;

            let selected = source_lod
                .groups
                .iter()
                .enumerate()
                .filter(|(index, _)| desc.selects_group(*index));

            for (_, group) in selected {
                for sub_mesh in &group.sub_meshes {
                    let Some(&material) = desc.materials.get(sub_mesh.material_slot as usize) else {
                        return Err(GrimError::MaterialSlotOutOfRange {
                            slot: sub_mesh.material_slot,
                            len: desc.materials.len(),
                        });
                    };
                    if materials.flags(material) & MATERIAL_INVISIBLE != 0 {
                        trace!(archetype = handle.raw(), material = material.0, "invisible sub-mesh skipped");
                        continue;
                    }

                    let batch = self
                        .batches
                        .insert(IndexedBatch {
                            first_index: sub_mesh.first_index,
                            index_count: sub_mesh.index_count,
                            next: None,
                            draw_info: None,
                        })
                        .ok_or(GrimError::PoolExhausted {
                            pool: "indexed batch",
                            capacity: self.batches.capacity(),
                        })?;
                    slots.batches.push(batch);

                    let draw = self
                        .draw_infos
                        .insert(DrawInfo {
                            archetype: handle,
                            info: Arc::clone(info),
                            material,
                            topology: sub_mesh.topology,
                            batch,
                            lod: lod_count,
                        })
                        .ok_or(GrimError::PoolExhausted {
                            pool: "draw info",
                            capacity: self.draw_infos.capacity(),
                        })?;
                    slots.draws.push(draw);

                    if let Some(entry) = self.batches.get_mut(batch) {
                        entry.draw_info = Some(draw);
                    }
                    match prev_batch.and_then(|prev| self.batches.get_mut(prev)) {
                        Some(prev) => prev.next = Some(batch),
                        None => first_batch = Some(batch),
                    }
                    prev_batch = Some(batch);
                    batch_count += 1;
                }
            }

            if batch_count == 0 {
                continue;
            }

            let lod = self
                .lod_infos
                .insert(LodInfo {
                    switch_distance: source_lod.switch_distance,
                    first_batch,
                    next: None,
                    batch_count,
                })
                .ok_or(GrimError::PoolExhausted {
                    pool: "lod info",
                    capacity: self.lod_infos.capacity(),
                })?;
            slots.lods.push(lod);

            match prev_lod.and_then(|prev| self.lod_infos.get_mut(prev)) {
                Some(prev) => prev.next = Some(lod),
                None => first_lod = Some(lod),
            }
            prev_lod = Some(lod);
            lod_count += 1;
            total_batches += batch_count;
        }

        Ok((first_lod, lod_count, total_batches))
    }

    /// Frees every LodInfo, batch and draw record of an archetype.
    fn free_subtree(&mut self, handle: ArchetypeHandle) {
        let list = std::mem::take(&mut self.lod_lists[handle.index()]);

        let mut lod_cursor = list.first_lod;
        while let Some(lod_slot) = lod_cursor {
            let Some(lod) = self.lod_infos.remove(lod_slot) else {
                break;
            };
            lod_cursor = lod.next;

            let mut batch_cursor = lod.first_batch;
            while let Some(batch_slot) = batch_cursor {
                let Some(batch) = self.batches.remove(batch_slot) else {
                    break;
                };
                batch_cursor = batch.next;
                if let Some(draw) = batch.draw_info {
                    self.draw_infos.remove(draw);
                }
            }
        }

        self.live.remove(handle.index());
        self.lod_list_revision += 1;
    }

    fn rebuild_mirror(&mut self) {
        let live = &self.live;
        self.mirror.lod_lists = self.lod_lists[..self.lod_list_high_water as usize]
            .iter()
            .enumerate()
            .map(|(index, list)| {
                if live.contains(index) {
                    GpuLodList {
                        first_lod: link(list.first_lod),
                        lod_count: list.lod_count,
                        batch_count: list.batch_count,
                        _pad: 0,
                    }
                } else {
                    GpuLodList::EMPTY
                }
            })
            .collect();

        self.mirror.lod_infos = self.lod_infos.mirror(GpuLodInfo::EMPTY, |lod| GpuLodInfo {
            switch_distance: lod.switch_distance,
            first_batch: link(lod.first_batch),
            next: link(lod.next),
            batch_count: lod.batch_count,
        });

        self.mirror.batches = self.batches.mirror(GpuIndexedBatch::EMPTY, |batch| GpuIndexedBatch {
            first_index: batch.first_index,
            index_count: batch.index_count,
            next: link(batch.next),
            draw_info: batch.draw_info.map_or(u32::MAX, SlotId::raw),
        });
    }

    /// GPU-layout copy of the pools as of the last sync.
    #[must_use]
    pub fn mirror(&self) -> &PoolMirror {
        &self.mirror
    }

    /// Changes whenever any pool changes.
    #[must_use]
    pub fn pool_revision(&self) -> u64 {
        self.lod_list_revision
            + self.lod_infos.revision()
            + self.batches.revision()
            + self.draw_infos.revision()
    }

    /// True if creations or destructions are waiting for a sync.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.requests.has_pending()
    }

    /// True once the archetype's sub-tree is built, until it is destroyed.
    #[must_use]
    pub fn is_live(&self, handle: ArchetypeHandle) -> bool {
        self.live.contains(handle.index())
    }

    /// Number of built archetypes.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.count()
    }

    /// Built archetypes in id order.
    pub fn live_archetypes(&self) -> impl Iterator<Item = ArchetypeHandle> + '_ {
        self.live.iter().map(|index| ArchetypeHandle(index as u32))
    }

    /// LodList of a built archetype.
    #[must_use]
    pub fn lod_list(&self, handle: ArchetypeHandle) -> Option<&LodList> {
        if !self.is_live(handle) {
            return None;
        }
        self.lod_lists.get(handle.index())
    }

    /// LODs of a built archetype.
    #[must_use]
    pub fn lod_count(&self, handle: ArchetypeHandle) -> Option<u32> {
        self.lod_list(handle).map(|list| list.lod_count)
    }

    /// Batches of an archetype; zero unless built.
    #[must_use]
    pub fn batch_count(&self, handle: ArchetypeHandle) -> u32 {
        self.lod_list(handle).map_or(0, |list| list.batch_count)
    }

    /// Shared description of a built archetype.
    #[must_use]
    pub fn info(&self, handle: ArchetypeHandle) -> Option<&Arc<ArchetypeInfo>> {
        self.lod_list(handle)?.info.as_ref()
    }

    /// LodInfo by slot.
    #[must_use]
    pub fn lod_info(&self, slot: SlotId) -> Option<&LodInfo> {
        self.lod_infos.get(slot)
    }

    /// Batch by slot.
    #[must_use]
    pub fn batch(&self, slot: SlotId) -> Option<&IndexedBatch> {
        self.batches.get(slot)
    }

    /// Draw record by slot.
    #[must_use]
    pub fn draw_info(&self, slot: SlotId) -> Option<&DrawInfo> {
        self.draw_infos.get(slot)
    }

    /// Every live draw record, in slot order.
    pub fn draw_infos(&self) -> impl Iterator<Item = (SlotId, &DrawInfo)> {
        self.draw_infos.iter()
    }

    /// Live LodInfo entries.
    #[must_use]
    pub fn lod_info_count(&self) -> u32 {
        self.lod_infos.len()
    }

    /// Live batches across all archetypes.
    #[must_use]
    pub fn total_batch_count(&self) -> u32 {
        self.batches.len()
    }

    /// Live draw records.
    #[must_use]
    pub fn draw_info_count(&self) -> u32 {
        self.draw_infos.len()
    }
}
