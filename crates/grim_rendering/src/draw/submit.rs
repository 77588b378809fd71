//! Records a [`DrawPlan`] into a render pass.

use tracing::{trace, warn};

use super::{DrawPlan, DrawRecord, DrawStats};
use crate::archetype::{ArchetypeInfo, BufferId};
use crate::external::{BufferProvider, MaterialSystem};
use crate::gpu_types::DrawIndexedIndirectArgs;
use crate::prepare::RenderState;

/// Issues the plan: one material setup per group, one indexed-indirect draw
/// per record.
///
/// Records whose buffers no longer resolve are skipped, as are whole groups
/// whose material setup fails. A state without buffers draws nothing.
pub fn submit_plan<'a, M, B>(
    plan: &DrawPlan,
    pass: &mut wgpu::RenderPass<'a>,
    state: &'a RenderState,
    materials: &'a M,
    buffers: &'a B,
) -> DrawStats
where
    M: MaterialSystem + ?Sized,
    B: BufferProvider + ?Sized,
{
    let mut stats = DrawStats {
        skipped: plan.skipped,
        ..DrawStats::default()
    };
    let Some(frame) = &state.buffers else {
        return stats;
    };

    pass.push_debug_group("grim::draw");
    for group in &plan.groups {
        let Some(first) = group.records.first() else {
            continue;
        };
        let vertex_format = &first.info.vertex_format;
        if !materials.setup(pass, group.key.material, vertex_format, group.key.topology) {
            warn!(material = group.key.material.0, "material setup failed, group skipped");
            stats.skipped += group.records.len() as u32;
            continue;
        }
        stats.groups += 1;

        for record in &group.records {
            let Some((streams, index)) = resolve(record, &frame.instance_ids, buffers) else {
                trace!(archetype = record.archetype.raw(), "buffers missing, draw skipped");
                stats.skipped += 1;
                continue;
            };

            for (slot, buffer) in streams.into_iter().enumerate() {
                pass.set_vertex_buffer(slot as u32, buffer.slice(..));
            }
            pass.set_index_buffer(index.slice(..), record.info.index_format);
            pass.draw_indexed_indirect(&frame.indirect, DrawIndexedIndirectArgs::offset_of(record.batch.raw()));
            stats.draws += 1;
        }
    }
    pass.pop_debug_group();

    stats
}

/// Every vertex stream in slot order plus the index buffer, or None if any
/// of them is gone.
fn resolve<'a, B: BufferProvider + ?Sized>(
    record: &DrawRecord,
    instance_ids: &'a wgpu::Buffer,
    buffers: &'a B,
) -> Option<(Vec<&'a wgpu::Buffer>, &'a wgpu::Buffer)> {
    let info = &record.info;
    let streams = slot_order(info, instance_ids, |id| buffers.buffer(id))?;
    let index = buffers.buffer(info.index_buffer)?;
    Some((streams, index))
}

/// One entry per vertex slot: archetype buffers around `instance`, which
/// sits at the instance slot.
fn slot_order<'a, T: ?Sized>(
    info: &ArchetypeInfo,
    instance: &'a T,
    lookup: impl Fn(BufferId) -> Option<&'a T>,
) -> Option<Vec<&'a T>> {
    (0..info.vertex_format.streams.len() as u32)
        .map(|slot| match info.stream_for_slot(slot) {
            Some(id) => lookup(id),
            None if slot == info.instance_slot => Some(instance),
            None => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::archetype::{VertexFormat, VertexFormatId, VertexStreamLayout};

    fn info(steps: &[wgpu::VertexStepMode], streams: &[u32]) -> ArchetypeInfo {
        let vertex_format = VertexFormat {
            id: VertexFormatId(0),
            streams: steps
                .iter()
                .map(|&step_mode| VertexStreamLayout { stride: 4, step_mode })
                .collect(),
        };
        ArchetypeInfo {
            vertex_streams: streams.iter().copied().map(BufferId).collect(),
            index_buffer: BufferId(1),
            index_format: wgpu::IndexFormat::Uint32,
            instance_slot: vertex_format.instance_stream_slot().unwrap(),
            vertex_format: Arc::new(vertex_format),
        }
    }

    fn names() -> HashMap<BufferId, &'static str> {
        HashMap::from([
            (BufferId(10), "position"),
            (BufferId(11), "uv"),
            (BufferId(12), "normal"),
        ])
    }

    #[test]
    fn test_instance_stream_mid_layout() {
        use wgpu::VertexStepMode::{Instance, Vertex};

        let info = info(&[Vertex, Instance, Vertex, Vertex], &[10, 11, 12]);
        let names = names();
        let order = slot_order(&info, "ids", |id| names.get(&id).copied()).unwrap();
        assert_eq!(order, vec!["position", "ids", "uv", "normal"]);
    }

    #[test]
    fn test_instance_stream_first_and_last() {
        use wgpu::VertexStepMode::{Instance, Vertex};
        let names = names();

        let first = info(&[Instance, Vertex], &[10]);
        assert_eq!(
            slot_order(&first, "ids", |id| names.get(&id).copied()),
            Some(vec!["ids", "position"])
        );

        let last = info(&[Vertex, Vertex, Instance], &[10, 11]);
        assert_eq!(
            slot_order(&last, "ids", |id| names.get(&id).copied()),
            Some(vec!["position", "uv", "ids"])
        );
    }

    #[test]
    fn test_missing_stream_fails_resolution() {
        use wgpu::VertexStepMode::{Instance, Vertex};

        let info = info(&[Vertex, Instance, Vertex], &[10, 99]);
        let names = names();
        assert_eq!(slot_order(&info, "ids", |id| names.get(&id).copied()), None);
    }
}
