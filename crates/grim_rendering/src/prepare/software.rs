//! # Software Prepare
//!
//! The CPU rendition of the prepare stages. Each stage is a pure function
//! over the same data layouts the compute shaders use, so results can be
//! compared directly. [`SoftwarePrepare`] runs them synchronously and
//! writes the results into the frame buffers.

use grim_core::BitSet;
use tracing::trace;

use super::{admitted, FrameBuffers, PrepareBackend, PrepareFrame, PrepareOutput};
use crate::archetype::{ArchetypeRegistry, PoolMirror};
use crate::config::{GrimConfig, PrepareBackendKind};
use crate::external::InstanceAllocator;
use crate::gpu_types::{
    bound_slot, pack_key, DrawIndexedIndirectArgs, GpuInstanceBound, GpuInstanceInfo, InstanceRecord,
};

/// Packs the sort key of every drawable instance.
///
/// Instances of archetypes without batches are dropped. LODs beyond an
/// archetype's last LOD are clamped to it.
#[must_use]
pub fn pack_instances(records: &[InstanceRecord], mirror: &PoolMirror) -> Vec<GpuInstanceInfo> {
    records
        .iter()
        .filter(|record| mirror.batch_count(record.archetype) > 0)
        .filter_map(|record| {
            let lod = mirror.clamp_lod(record.archetype, record.lod)?;
            Some(GpuInstanceInfo {
                packed_key: pack_key(record.archetype, lod),
                instance_id: record.instance_id,
            })
        })
        .collect()
}

/// Stable sort by packed key: archetype, then LOD.
pub fn sort_instances(infos: &mut [GpuInstanceInfo]) {
    infos.sort_by_key(|info| info.packed_key);
}

/// One bound per `(archetype, lod)` slot. Runs present in `sorted` get
/// `[first, last)`; every other slot stays empty.
#[must_use]
pub fn compute_bounds(sorted: &[GpuInstanceInfo], bound_count: usize) -> Vec<GpuInstanceBound> {
    let mut bounds = vec![GpuInstanceBound::EMPTY; bound_count];

    let mut start = 0;
    while start < sorted.len() {
        let key = sorted[start].packed_key;
        let len = sorted[start..]
            .iter()
            .take_while(|info| info.packed_key == key)
            .count();
        let end = start + len;

        let info = sorted[start];
        if let Some(bound) = bounds.get_mut(bound_slot(info.archetype(), info.lod())) {
            *bound = GpuInstanceBound {
                first: start as u32,
                last: end as u32,
                arch_idx: info.archetype() as i32,
                lod_index: info.lod(),
            };
        }
        start = end;
    }

    bounds
}

/// Writes one indirect command per batch of every populated bound, at the
/// batch's slot.
///
/// Slots of batches no populated bound reaches stay zeroed.
#[must_use]
pub fn generate_commands(
    bounds: &[GpuInstanceBound],
    mirror: &PoolMirror,
    command_count: usize,
) -> Vec<DrawIndexedIndirectArgs> {
    let mut commands = vec![DrawIndexedIndirectArgs::default(); command_count];

    for bound in bounds.iter().filter(|bound| bound.is_populated()) {
        let archetype = bound.arch_idx as u32;
        for (slot, batch) in mirror.lod_batches(archetype, bound.lod_index) {
            if let Some(command) = commands.get_mut(slot as usize) {
                *command = DrawIndexedIndirectArgs {
                    index_count: batch.index_count,
                    instance_count: bound.len(),
                    first_index: batch.first_index,
                    base_vertex: 0,
                    first_instance: bound.first,
                };
            }
        }
    }

    commands
}

/// Live archetypes the allocator currently has instances of.
#[must_use]
pub fn visible_archetypes<A: InstanceAllocator + ?Sized>(
    registry: &ArchetypeRegistry,
    allocator: &A,
    capacity: usize,
) -> BitSet {
    let mut visible = BitSet::new(capacity);
    for handle in registry.live_archetypes() {
        if registry.batch_count(handle) > 0 && allocator.instance_count_by_archetype(handle) > 0 {
            visible.insert(handle.index());
        }
    }
    visible
}

/// Result of running every CPU stage over one population.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftwareFrame {
    /// Surviving instances, sorted.
    pub sorted: Vec<GpuInstanceInfo>,
    /// One entry per bound slot.
    pub bounds: Vec<GpuInstanceBound>,
    /// One entry per batch slot of the mirror.
    pub commands: Vec<DrawIndexedIndirectArgs>,
}

impl SoftwareFrame {
    /// Runs pack, sort, bounds and command generation.
    #[must_use]
    pub fn build(records: &[InstanceRecord], mirror: &PoolMirror, bound_count: usize) -> Self {
        let mut sorted = pack_instances(records, mirror);
        sort_instances(&mut sorted);
        let bounds = compute_bounds(&sorted, bound_count);
        let commands = generate_commands(&bounds, mirror, mirror.batches.len());
        Self { sorted, bounds, commands }
    }

    /// Sorted instance ids, the contents of the instance-id buffer.
    #[must_use]
    pub fn instance_ids(&self) -> Vec<u32> {
        self.sorted.iter().map(|info| info.instance_id).collect()
    }
}

/// Prepare strategy that runs on the calling thread.
#[derive(Debug)]
pub struct SoftwarePrepare {
    config: GrimConfig,
}

impl SoftwarePrepare {
    /// Creates the backend.
    #[must_use]
    pub fn new(config: &GrimConfig) -> Self {
        Self { config: config.clone() }
    }
}

impl PrepareBackend for SoftwarePrepare {
    fn kind(&self) -> PrepareBackendKind {
        PrepareBackendKind::Software
    }

    fn prepare(&mut self, frame: &PrepareFrame<'_>, _encoder: &mut wgpu::CommandEncoder) -> Option<PrepareOutput> {
        let instances = admitted(frame.instances, self.config.max_instance_slots);
        let bound_count = self.config.bound_count() as usize;
        let result = SoftwareFrame::build(instances, frame.mirror, bound_count);

        let buffers = FrameBuffers::new(frame.device, &self.config);
        let ids = result.instance_ids();
        if !ids.is_empty() {
            frame.queue.write_buffer(&buffers.instance_ids, 0, bytemuck::cast_slice(&ids));
        }
        let command_count = result.commands.len().min(self.config.max_batches as usize);
        if command_count > 0 {
            frame.queue.write_buffer(
                &buffers.indirect,
                0,
                bytemuck::cast_slice(&result.commands[..command_count]),
            );
        }
        frame.queue.write_buffer(&buffers.bounds, 0, bytemuck::cast_slice(&result.bounds));

        trace!(
            raw = frame.instances.len(),
            survivors = result.sorted.len(),
            "software prepare finished"
        );
        Some(PrepareOutput {
            buffers,
            survivors: Some(result.sorted.len() as u32),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu_types::{GpuIndexedBatch, GpuLodInfo, GpuLodList};

    /// Archetype 0: LOD0 batch 0 [0, 300), LOD1 batch 1 [300, 450).
    /// Archetype 1: empty slot.
    /// Archetype 2: one LOD, batches 2 and 3.
    fn mirror() -> PoolMirror {
        PoolMirror {
            lod_lists: vec![
                GpuLodList { first_lod: 0, lod_count: 2, batch_count: 2, _pad: 0 },
                GpuLodList::EMPTY,
                GpuLodList { first_lod: 2, lod_count: 1, batch_count: 2, _pad: 0 },
            ],
            lod_infos: vec![
                GpuLodInfo { switch_distance: 0.0, first_batch: 0, next: 1, batch_count: 1 },
                GpuLodInfo { switch_distance: 50.0, first_batch: 1, next: -1, batch_count: 1 },
                GpuLodInfo { switch_distance: 0.0, first_batch: 2, next: -1, batch_count: 2 },
            ],
            batches: vec![
                GpuIndexedBatch { first_index: 0, index_count: 300, next: -1, draw_info: 0 },
                GpuIndexedBatch { first_index: 300, index_count: 150, next: -1, draw_info: 1 },
                GpuIndexedBatch { first_index: 0, index_count: 36, next: 3, draw_info: 2 },
                GpuIndexedBatch { first_index: 36, index_count: 12, next: -1, draw_info: 3 },
            ],
        }
    }

    #[test]
    fn test_pack_drops_archetypes_without_batches() {
        let records = [
            InstanceRecord::new(10, 0, 0),
            InstanceRecord::new(11, 1, 0),
            InstanceRecord::new(12, 7, 0),
            InstanceRecord::new(13, 2, 0),
        ];
        let packed = pack_instances(&records, &mirror());
        let ids: Vec<_> = packed.iter().map(|info| info.instance_id).collect();
        assert_eq!(ids, vec![10, 13]);
    }

    #[test]
    fn test_pack_clamps_lod() {
        let packed = pack_instances(&[InstanceRecord::new(1, 0, 3), InstanceRecord::new(2, 2, 7)], &mirror());
        assert_eq!(packed[0].lod(), 1);
        assert_eq!(packed[1].lod(), 0);
        assert_eq!(packed[1].archetype(), 2);
    }

    #[test]
    fn test_sort_is_stable() {
        let mut infos = vec![
            GpuInstanceInfo { packed_key: pack_key(2, 0), instance_id: 1 },
            GpuInstanceInfo { packed_key: pack_key(0, 1), instance_id: 2 },
            GpuInstanceInfo { packed_key: pack_key(2, 0), instance_id: 3 },
            GpuInstanceInfo { packed_key: pack_key(0, 0), instance_id: 4 },
        ];
        sort_instances(&mut infos);
        let ids: Vec<_> = infos.iter().map(|info| info.instance_id).collect();
        assert_eq!(ids, vec![4, 2, 1, 3]);
    }

    #[test]
    fn test_bounds_of_empty_population() {
        let bounds = compute_bounds(&[], 16);
        assert!(bounds.iter().all(|bound| *bound == GpuInstanceBound::EMPTY));
    }

    #[test]
    fn test_bounds_single_run() {
        let sorted = vec![GpuInstanceInfo { packed_key: pack_key(1, 2), instance_id: 0 }; 4];
        let bounds = compute_bounds(&sorted, 24);
        let bound = bounds[bound_slot(1, 2)];
        assert_eq!((bound.first, bound.last, bound.arch_idx, bound.lod_index), (0, 4, 1, 2));
        assert_eq!(bounds.iter().filter(|b| b.is_populated()).count(), 1);
    }

    #[test]
    fn test_two_lod_scenario() {
        let records = [
            InstanceRecord::new(0, 0, 0),
            InstanceRecord::new(1, 0, 1),
            InstanceRecord::new(2, 0, 0),
            InstanceRecord::new(3, 0, 1),
            InstanceRecord::new(4, 0, 0),
        ];
        let frame = SoftwareFrame::build(&records, &mirror(), 24);

        let lod0 = frame.bounds[bound_slot(0, 0)];
        let lod1 = frame.bounds[bound_slot(0, 1)];
        assert_eq!((lod0.first, lod0.last), (0, 3));
        assert_eq!((lod1.first, lod1.last), (3, 5));

        assert_eq!(
            frame.commands[0],
            DrawIndexedIndirectArgs {
                index_count: 300,
                instance_count: 3,
                first_index: 0,
                base_vertex: 0,
                first_instance: 0,
            }
        );
        assert_eq!(
            frame.commands[1],
            DrawIndexedIndirectArgs {
                index_count: 150,
                instance_count: 2,
                first_index: 300,
                base_vertex: 0,
                first_instance: 3,
            }
        );
        assert_eq!(frame.commands[2], DrawIndexedIndirectArgs::default());
        assert_eq!(frame.instance_ids(), vec![0, 2, 4, 1, 3]);
    }

    #[test]
    fn test_commands_cover_every_batch_of_lod() {
        let records = [InstanceRecord::new(5, 2, 0), InstanceRecord::new(6, 2, 4)];
        let frame = SoftwareFrame::build(&records, &mirror(), 24);
        assert_eq!(frame.commands[2].instance_count, 2);
        assert_eq!(frame.commands[3].instance_count, 2);
        assert_eq!(frame.commands[3].first_index, 36);
        assert_eq!(frame.commands[0].instance_count, 0);
    }

    #[test]
    fn test_out_of_range_lod_resolves_to_last() {
        let frame = SoftwareFrame::build(&[InstanceRecord::new(9, 0, 3)], &mirror(), 24);
        assert!(frame.bounds[bound_slot(0, 1)].is_populated());
        assert!(!frame.bounds[bound_slot(0, 3)].is_populated());
        assert_eq!(frame.commands[1].instance_count, 1);
        assert_eq!(frame.commands[0].instance_count, 0);
    }
}
