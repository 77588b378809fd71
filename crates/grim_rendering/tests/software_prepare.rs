//! # Software Prepare Tests
//!
//! Bucket partitioning and command generation over registry-built pools.

mod common;

use common::{archetype, config, random_archetype, random_population, TestMaterials};
use grim_rendering::gpu_types::bound_slot;
use grim_rendering::prepare::software::{visible_archetypes, SoftwareFrame};
use grim_rendering::{ArchetypeRegistry, DrawIndexedIndirectArgs, InstanceRecord, PrepareBackendKind};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn registry() -> ArchetypeRegistry {
    ArchetypeRegistry::new(&config(PrepareBackendKind::Software))
}

fn bound_count() -> usize {
    config(PrepareBackendKind::Software).bound_count() as usize
}

/// Two LODs: LOD0 indices [0, 300), LOD1 indices [300, 450).
#[test]
fn test_two_lod_archetype_scenario() {
    let mut reg = registry();
    let a = reg.create_archetype(archetype(&[&[(0, 300)], &[(300, 150)]])).unwrap();
    reg.sync(&TestMaterials);

    let records = [
        InstanceRecord::new(10, a.raw(), 0),
        InstanceRecord::new(11, a.raw(), 0),
        InstanceRecord::new(12, a.raw(), 1),
        InstanceRecord::new(13, a.raw(), 0),
        InstanceRecord::new(14, a.raw(), 1),
    ];
    let frame = SoftwareFrame::build(&records, reg.mirror(), bound_count());

    let lod0 = frame.bounds[bound_slot(a.raw(), 0)];
    let lod1 = frame.bounds[bound_slot(a.raw(), 1)];
    assert_eq!((lod0.first, lod0.last), (0, 3));
    assert_eq!((lod1.first, lod1.last), (3, 5));

    let list = reg.lod_list(a).unwrap();
    let lod0_info = reg.lod_info(list.first_lod.unwrap()).unwrap();
    let lod0_batch = lod0_info.first_batch.unwrap();
    let lod1_batch = reg.lod_info(lod0_info.next.unwrap()).unwrap().first_batch.unwrap();

    let cmd0 = frame.commands[lod0_batch.index()];
    let cmd1 = frame.commands[lod1_batch.index()];
    assert_eq!((cmd0.first_instance, cmd0.instance_count), (0, 3));
    assert_eq!((cmd0.first_index, cmd0.index_count), (0, 300));
    assert_eq!((cmd1.first_instance, cmd1.instance_count), (3, 2));
    assert_eq!((cmd1.first_index, cmd1.index_count), (300, 150));
}

#[test]
fn test_lod_three_on_two_lod_archetype_draws_lod_one() {
    let mut reg = registry();
    let a = reg.create_archetype(archetype(&[&[(0, 300)], &[(300, 150)]])).unwrap();
    reg.sync(&TestMaterials);

    let frame = SoftwareFrame::build(&[InstanceRecord::new(0, a.raw(), 3)], reg.mirror(), bound_count());
    let populated: Vec<_> = frame.bounds.iter().filter(|b| b.is_populated()).collect();
    assert_eq!(populated.len(), 1);
    assert_eq!(populated[0].lod_index, 1);

    let drawn: Vec<_> = frame.commands.iter().filter(|c| c.instance_count > 0).collect();
    assert_eq!(drawn.len(), 1);
    assert_eq!(drawn[0].first_index, 300);
}

#[test]
fn test_instances_of_destroyed_archetype_are_dropped() {
    let mut reg = registry();
    let a = reg.create_archetype(archetype(&[&[(0, 30)]])).unwrap();
    let b = reg.create_archetype(archetype(&[&[(0, 60)]])).unwrap();
    reg.sync(&TestMaterials);
    reg.destroy_archetype(a);
    reg.sync(&TestMaterials);

    let records = [InstanceRecord::new(0, a.raw(), 0), InstanceRecord::new(1, b.raw(), 0)];
    let frame = SoftwareFrame::build(&records, reg.mirror(), bound_count());
    assert_eq!(frame.instance_ids(), vec![1]);
}

#[test]
fn test_visible_archetypes_follow_allocator_counts() {
    let mut reg = registry();
    let a = reg.create_archetype(archetype(&[&[(0, 30)]])).unwrap();
    let b = reg.create_archetype(archetype(&[&[(0, 60)]])).unwrap();
    reg.sync(&TestMaterials);

    let allocator = common::TestAllocator::new(vec![InstanceRecord::new(0, b.raw(), 0)]);
    let visible = visible_archetypes(&reg, &allocator, 32);
    assert!(!visible.contains(a.index()));
    assert!(visible.contains(b.index()));
}

#[test]
fn test_random_populations_partition_sorted_range() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut reg = registry();
    let handles: Vec<_> = (0..12)
        .map(|_| reg.create_archetype(random_archetype(&mut rng)).unwrap())
        .collect();
    reg.sync(&TestMaterials);

    for round in 0..20 {
        let count = 1 + round * 37;
        let records = random_population(&mut rng, &handles, count);
        let frame = SoftwareFrame::build(&records, reg.mirror(), bound_count());
        let survivors = frame.sorted.len() as u32;
        assert_eq!(survivors, count);

        // Disjoint, contiguous, covering [0, N).
        let mut runs: Vec<_> = frame
            .bounds
            .iter()
            .filter(|b| b.is_populated())
            .map(|b| (b.first, b.last))
            .collect();
        runs.sort_unstable();
        let mut cursor = 0;
        for (first, last) in &runs {
            assert_eq!(*first, cursor);
            assert!(last > first);
            cursor = *last;
        }
        assert_eq!(cursor, survivors);

        // Every element of a run carries the run's key.
        for bound in frame.bounds.iter().filter(|b| b.is_populated()) {
            for info in &frame.sorted[bound.first as usize..bound.last as usize] {
                assert_eq!(info.archetype(), bound.arch_idx as u32);
                assert_eq!(info.lod(), bound.lod_index);
            }
        }
    }
}

#[test]
fn test_unpopulated_buckets_issue_no_instances() {
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let mut reg = registry();
    let handles: Vec<_> = (0..6)
        .map(|_| reg.create_archetype(random_archetype(&mut rng)).unwrap())
        .collect();
    reg.sync(&TestMaterials);

    // Only the first two archetypes get instances.
    let records = random_population(&mut rng, &handles[..2], 300);
    let frame = SoftwareFrame::build(&records, reg.mirror(), bound_count());

    for (slot, command) in frame.commands.iter().enumerate() {
        if command.instance_count == 0 {
            continue;
        }
        let batch = reg.batch(grim_core::SlotId::from_raw(slot as u32)).unwrap();
        let draw = reg.draw_info(batch.draw_info.unwrap()).unwrap();
        assert!(handles[..2].contains(&draw.archetype));

        let lod = reg.mirror().clamp_lod(draw.archetype.raw(), draw.lod).unwrap();
        let bound = frame.bounds[bound_slot(draw.archetype.raw(), lod)];
        assert!(bound.is_populated());
        assert_eq!(command.instance_count, bound.len());
        assert_eq!(command.first_instance, bound.first);
    }

    let total: u32 = frame
        .bounds
        .iter()
        .filter(|b| b.is_populated())
        .map(|b| b.len())
        .sum();
    assert_eq!(total, 300);
    assert!(frame
        .commands
        .iter()
        .all(|c| c.instance_count > 0 || *c == DrawIndexedIndirectArgs::default()));
}
