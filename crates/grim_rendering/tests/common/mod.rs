//! Shared fixtures: a material system, an instance allocator and archetype
//! builders.

#![allow(dead_code)]

use std::sync::Arc;

use grim_rendering::{
    ArchetypeDesc, ArchetypeHandle, BufferId, GrimConfig, GrimRenderer, InstanceAllocator, InstanceRecord,
    MaterialId, MaterialSystem, MeshGroup, MeshLod, MeshSource, PrepareBackendKind, SubMesh,
    VertexFormat, VertexFormatId, VertexStreamLayout, MATERIAL_INVISIBLE, MATERIAL_TRANSPARENT,
};
use rand::Rng;

/// Material used by [`archetype`].
pub const OPAQUE: MaterialId = MaterialId(1);
/// Flagged invisible.
pub const HIDDEN: MaterialId = MaterialId(2);
/// Flagged transparent.
pub const GLASS: MaterialId = MaterialId(3);

pub struct TestMaterials;

impl MaterialSystem for TestMaterials {
    fn flags(&self, material: MaterialId) -> u32 {
        match material {
            HIDDEN => MATERIAL_INVISIBLE,
            GLASS => MATERIAL_TRANSPARENT,
            _ => 0,
        }
    }

    fn name(&self, _material: MaterialId) -> Option<&str> {
        None
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

/// Population handed to the prepare stage as-is.
#[derive(Default)]
pub struct TestAllocator {
    pub records: Vec<InstanceRecord>,
}

impl TestAllocator {
    pub fn new(records: Vec<InstanceRecord>) -> Self {
        Self { records }
    }
}

impl InstanceAllocator for TestAllocator {
    fn instance_slots_count(&self) -> u32 {
        1 << 12
    }

    fn instance_count(&self) -> u32 {
        self.records.len() as u32
    }

    fn instance_count_by_archetype(&self, archetype: ArchetypeHandle) -> u32 {
        self.records.iter().filter(|r| r.archetype == archetype.raw()).count() as u32
    }

    fn instances(&self) -> &[InstanceRecord] {
        &self.records
    }
}

pub fn config(backend: PrepareBackendKind) -> GrimConfig {
    GrimConfig {
        backend,
        max_archetypes: 32,
        max_lod_infos: 256,
        max_batches: 512,
        max_draw_infos: 512,
        max_instance_slots: 1 << 12,
        workgroup_size: 64,
        debug_material_filter: None,
    }
}

pub fn vertex_format() -> Arc<VertexFormat> {
    Arc::new(VertexFormat {
        id: VertexFormatId(0),
        streams: vec![
            VertexStreamLayout { stride: 12, step_mode: wgpu::VertexStepMode::Vertex },
            VertexStreamLayout { stride: 4, step_mode: wgpu::VertexStepMode::Instance },
        ],
    })
}

/// Archetype whose LOD `i` has one opaque batch per `(first_index,
/// index_count)` in `lods[i]`.
pub fn archetype(lods: &[&[(u32, u32)]]) -> ArchetypeDesc {
    let lods = lods
        .iter()
        .enumerate()
        .map(|(i, batches)| MeshLod {
            switch_distance: i as f32 * 25.0,
            groups: vec![MeshGroup {
                sub_meshes: batches
                    .iter()
                    .map(|&(first_index, index_count)| SubMesh {
                        first_index,
                        index_count,
                        material_slot: 0,
                        topology: wgpu::PrimitiveTopology::TriangleList,
                    })
                    .collect(),
            }],
        })
        .collect();

    ArchetypeDesc::new(
        vec![BufferId(100)],
        BufferId(101),
        vertex_format(),
        Arc::new(MeshSource { lods }),
        vec![OPAQUE],
    )
}

/// Archetype with one to four LODs of one to three batches each.
pub fn random_archetype<R: Rng>(rng: &mut R) -> ArchetypeDesc {
    let lod_count = rng.gen_range(1..=4);
    let lods: Vec<Vec<(u32, u32)>> = (0..lod_count)
        .map(|_| {
            (0..rng.gen_range(1..=3))
                .map(|_| (rng.gen_range(0..1000) * 3, rng.gen_range(1..100) * 3))
                .collect()
        })
        .collect();
    let views: Vec<&[(u32, u32)]> = lods.iter().map(Vec::as_slice).collect();
    archetype(&views)
}

/// `count` instances over `archetypes`, with LODs up to the global maximum.
pub fn random_population<R: Rng>(rng: &mut R, archetypes: &[ArchetypeHandle], count: u32) -> Vec<InstanceRecord> {
    (0..count)
        .map(|id| {
            let archetype = archetypes[rng.gen_range(0..archetypes.len())];
            InstanceRecord::new(id, archetype.raw(), rng.gen_range(0..8))
        })
        .collect()
}

fn adapter() -> Option<wgpu::Adapter> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
}

fn request_device(
    adapter: &wgpu::Adapter,
    features: wgpu::Features,
) -> Option<(Arc<wgpu::Device>, Arc<wgpu::Queue>)> {
    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("grim test device"),
            required_features: features,
            required_limits: wgpu::Limits::default(),
        },
        None,
    ))
    .ok()?;
    Some((Arc::new(device), Arc::new(queue)))
}

/// Device with the renderer's required features, or None if no adapter
/// offers them.
pub fn device() -> Option<(Arc<wgpu::Device>, Arc<wgpu::Queue>)> {
    let adapter = adapter()?;
    if !adapter.features().contains(GrimRenderer::REQUIRED_FEATURES) {
        println!("adapter {:?} lacks {:?}", adapter.get_info().name, GrimRenderer::REQUIRED_FEATURES);
        return None;
    }
    request_device(&adapter, GrimRenderer::REQUIRED_FEATURES)
}

/// Device created with no optional features.
pub fn bare_device() -> Option<(Arc<wgpu::Device>, Arc<wgpu::Queue>)> {
    request_device(&adapter()?, wgpu::Features::empty())
}

/// Copies `buffer` into a mappable staging buffer and reads it back.
pub fn read_back<T: bytemuck::Pod>(device: &wgpu::Device, queue: &wgpu::Queue, buffer: &wgpu::Buffer) -> Vec<T> {
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("grim test readback"),
        size: buffer.size(),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, buffer.size());
    queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    slice.map_async(wgpu::MapMode::Read, |result| result.unwrap());
    device.poll(wgpu::Maintain::Wait);
    let view = slice.get_mapped_range();
    let data = bytemuck::cast_slice::<u8, T>(&view).to_vec();
    drop(view);
    staging.unmap();
    data
}
