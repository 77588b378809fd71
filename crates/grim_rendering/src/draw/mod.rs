//! # Draw Submission
//!
//! Live draw records are grouped by `(material, vertex format, topology)`
//! so pipeline state is set once per group, then every record in the group
//! issues one indexed-indirect draw at its batch's command slot.
//!
//! Planning is pure CPU work over the registry. [`submit_plan`] records it
//! into a render pass.

mod submit;

pub use submit::submit_plan;

use std::collections::HashMap;
use std::sync::Arc;

use grim_core::{BitSet, SlotId};
use tracing::trace;

use crate::archetype::{ArchetypeHandle, ArchetypeInfo, ArchetypeRegistry, MaterialId, VertexFormatId};
use crate::external::MaterialSystem;

/// State shared by every draw in a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DrawKey {
    /// Material after the before-setup hook.
    pub material: MaterialId,
    /// Vertex layout.
    pub vertex_format: VertexFormatId,
    /// Primitive topology.
    pub topology: wgpu::PrimitiveTopology,
}

/// One indirect draw.
#[derive(Clone, Debug)]
pub struct DrawRecord {
    /// Source draw record.
    pub draw_info: SlotId,
    /// Batch slot, i.e. the indirect command slot.
    pub batch: SlotId,
    /// Owning archetype.
    pub archetype: ArchetypeHandle,
    /// Buffers and layout to bind.
    pub info: Arc<ArchetypeInfo>,
}

/// Draws sharing one [`DrawKey`].
#[derive(Clone, Debug)]
pub struct DrawGroup {
    /// Shared state.
    pub key: DrawKey,
    /// Draws in registry order.
    pub records: Vec<DrawRecord>,
}

/// Which records a pass should skip.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrawFilter {
    /// Skip materials carrying any of these flags.
    pub exclude_flags: u32,
    /// Only draw materials whose name contains this string.
    pub name_filter: Option<String>,
}

impl DrawFilter {
    /// Filter excluding the given material flags.
    #[must_use]
    pub fn excluding(exclude_flags: u32) -> Self {
        Self { exclude_flags, name_filter: None }
    }

    fn accepts<M: MaterialSystem + ?Sized>(&self, materials: &M, material: MaterialId) -> bool {
        if materials.flags(material) & self.exclude_flags != 0 {
            return false;
        }
        match &self.name_filter {
            Some(filter) => materials.name(material).is_some_and(|name| name.contains(filter.as_str())),
            None => true,
        }
    }
}

/// Grouped draws for one pass.
#[derive(Clone, Debug, Default)]
pub struct DrawPlan {
    /// Groups in first-seen order.
    pub groups: Vec<DrawGroup>,
    /// Records dropped by the material hook or the filter.
    pub skipped: u32,
}

impl DrawPlan {
    /// Pipeline setups the plan needs.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Indirect draws the plan issues.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.groups.iter().map(|group| group.records.len()).sum()
    }

    /// True if nothing would be drawn.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// What a submission issued.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawStats {
    /// Groups whose pipeline was set up.
    pub groups: u32,
    /// Indirect draws issued.
    pub draws: u32,
    /// Records skipped during planning or submission.
    pub skipped: u32,
}

/// Groups the live draw records of visible archetypes.
///
/// Archetypes missing from `visible` have no instances this frame and are
/// passed over without counting as skipped.
#[must_use]
pub fn plan_draws<M: MaterialSystem + ?Sized>(
    registry: &ArchetypeRegistry,
    visible: &BitSet,
    materials: &M,
    filter: &DrawFilter,
) -> DrawPlan {
    let mut plan = DrawPlan::default();
    let mut index: HashMap<DrawKey, usize> = HashMap::new();

    for (slot, draw) in registry.draw_infos() {
        if !visible.contains(draw.archetype.index()) {
            continue;
        }
        let Some(material) = materials.before_setup(draw.material) else {
            plan.skipped += 1;
            continue;
        };
        if !filter.accepts(materials, material) {
            plan.skipped += 1;
            continue;
        }

        let key = DrawKey {
            material,
            vertex_format: draw.info.vertex_format.id,
            topology: draw.topology,
        };
        let record = DrawRecord {
            draw_info: slot,
            batch: draw.batch,
            archetype: draw.archetype,
            info: Arc::clone(&draw.info),
        };

        let group = *index.entry(key).or_insert_with(|| {
            plan.groups.push(DrawGroup { key, records: Vec::new() });
            plan.groups.len() - 1
        });
        plan.groups[group].records.push(record);
    }

    trace!(
        groups = plan.group_count(),
        records = plan.record_count(),
        skipped = plan.skipped,
        "draw plan built"
    );
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archetype::{
        ArchetypeDesc, BufferId, MeshGroup, MeshLod, MeshSource, SubMesh, VertexFormat, VertexStreamLayout,
    };
    use crate::config::GrimConfig;
    use crate::external::{MATERIAL_INVISIBLE, MATERIAL_TRANSPARENT};

    /// Material 7 is transparent, 8 is dropped by the hook, 9 is invisible.
    struct Materials;

    impl MaterialSystem for Materials {
        fn flags(&self, material: MaterialId) -> u32 {
            match material.0 {
                7 => MATERIAL_TRANSPARENT,
                9 => MATERIAL_INVISIBLE,
                _ => 0,
            }
        }

        fn name(&self, material: MaterialId) -> Option<&str> {
            match material.0 {
                1 => Some("rock"),
                2 => Some("grass"),
                _ => None,
            }
        }

        fn before_setup(&self, material: MaterialId) -> Option<MaterialId> {
            (material.0 != 8).then_some(material)
        }

        fn setup<'a>(
            &'a self,
            _pass: &mut wgpu::RenderPass<'a>,
            _material: MaterialId,
            _vertex_format: &VertexFormat,
            _topology: wgpu::PrimitiveTopology,
        ) -> bool {
            true
        }
    }

    fn format(id: u32) -> Arc<VertexFormat> {
        Arc::new(VertexFormat {
            id: VertexFormatId(id),
            streams: vec![
                VertexStreamLayout { stride: 12, step_mode: wgpu::VertexStepMode::Vertex },
                VertexStreamLayout { stride: 4, step_mode: wgpu::VertexStepMode::Instance },
            ],
        })
    }

    fn desc(format_id: u32, materials: &[u32]) -> ArchetypeDesc {
        let sub_meshes = (0..materials.len() as u32)
            .map(|slot| SubMesh {
                first_index: slot * 3,
                index_count: 3,
                material_slot: slot,
                topology: wgpu::PrimitiveTopology::TriangleList,
            })
            .collect();
        ArchetypeDesc::new(
            vec![BufferId(1)],
            BufferId(2),
            format(format_id),
            Arc::new(MeshSource {
                lods: vec![MeshLod { switch_distance: 0.0, groups: vec![MeshGroup { sub_meshes }] }],
            }),
            materials.iter().copied().map(MaterialId).collect(),
        )
    }

    fn registry(descs: Vec<ArchetypeDesc>) -> ArchetypeRegistry {
        let mut registry = ArchetypeRegistry::new(&GrimConfig {
            max_archetypes: 8,
            max_lod_infos: 16,
            max_batches: 32,
            max_draw_infos: 32,
            ..GrimConfig::default()
        });
        for d in descs {
            registry.create_archetype(d).unwrap();
        }
        registry.sync(&Materials);
        registry
    }

    fn all_visible() -> BitSet {
        let mut visible = BitSet::new(8);
        for i in 0..8 {
            visible.insert(i);
        }
        visible
    }

    #[test]
    fn test_groups_by_material_and_format() {
        let registry = registry(vec![desc(0, &[1, 2]), desc(0, &[1, 2]), desc(1, &[1])]);
        let plan = plan_draws(&registry, &all_visible(), &Materials, &DrawFilter::default());

        assert_eq!(plan.record_count(), 5);
        assert_eq!(plan.group_count(), 3);
        assert_eq!(plan.groups[0].key.material, MaterialId(1));
        assert_eq!(plan.groups[0].records.len(), 2);
        assert_eq!(plan.groups[1].key.material, MaterialId(2));
        assert_eq!(plan.groups[2].key.vertex_format, VertexFormatId(1));
    }

    #[test]
    fn test_group_count_bounded_by_unique_pairs() {
        let descs = (0..6).map(|_| desc(0, &[1, 2])).collect();
        let registry = registry(descs);
        let plan = plan_draws(&registry, &all_visible(), &Materials, &DrawFilter::default());
        assert_eq!(plan.record_count(), 12);
        assert_eq!(plan.group_count(), 2);
    }

    #[test]
    fn test_invisible_archetypes_are_passed_over() {
        let registry = registry(vec![desc(0, &[1]), desc(0, &[2])]);
        let mut visible = BitSet::new(8);
        visible.insert(1);

        let plan = plan_draws(&registry, &visible, &Materials, &DrawFilter::default());
        assert_eq!(plan.record_count(), 1);
        assert_eq!(plan.groups[0].records[0].archetype, ArchetypeHandle::from_raw(1));
        assert_eq!(plan.skipped, 0);
    }

    #[test]
    fn test_hook_dropping_material_skips_record() {
        let registry = registry(vec![desc(0, &[8, 1])]);
        let plan = plan_draws(&registry, &all_visible(), &Materials, &DrawFilter::default());
        assert_eq!(plan.record_count(), 1);
        assert_eq!(plan.skipped, 1);
    }

    #[test]
    fn test_exclude_flags() {
        let registry = registry(vec![desc(0, &[1, 7])]);
        let opaque = plan_draws(&registry, &all_visible(), &Materials, &DrawFilter::excluding(MATERIAL_TRANSPARENT));
        assert_eq!(opaque.record_count(), 1);
        assert_eq!(opaque.groups[0].key.material, MaterialId(1));
        assert_eq!(opaque.skipped, 1);
    }

    #[test]
    fn test_name_filter() {
        let registry = registry(vec![desc(0, &[1, 2, 3])]);
        let filter = DrawFilter { exclude_flags: 0, name_filter: Some("ock".to_string()) };
        let plan = plan_draws(&registry, &all_visible(), &Materials, &filter);
        assert_eq!(plan.record_count(), 1);
        assert_eq!(plan.groups[0].key.material, MaterialId(1));
        assert_eq!(plan.skipped, 2);
    }

    #[test]
    fn test_invisible_material_never_reaches_plan() {
        let registry = registry(vec![desc(0, &[9, 1])]);
        let plan = plan_draws(&registry, &all_visible(), &Materials, &DrawFilter::default());
        assert_eq!(plan.record_count(), 1);
        assert_eq!(plan.skipped, 0);
    }
}
