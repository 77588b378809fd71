//! Compute-shader prepare.
//!
//! All stages are recorded into the caller's encoder in one compute pass.
//! Nothing is read back: the surviving count only exists on the GPU, in the
//! append counter the cull stage fills.

use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use tracing::{debug, warn};

use super::{admitted, FrameBuffers, PrepareBackend, PrepareFrame, PrepareOutput};
use crate::config::{GrimConfig, PrepareBackendKind};
use crate::gpu_types::{GpuInstanceInfo, InstanceRecord};

const SHADER_SOURCE: &str = include_str!("../shaders/prepare.wgsl");

/// Frame constants, binding 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PrepareParams {
    raw_count: u32,
    sort_capacity: u32,
    bound_count: u32,
    command_count: u32,
}

/// One bitonic compare-exchange stage, binding 10.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SortStep {
    k: u32,
    j: u32,
    _pad: [u32; 2],
}

/// `(k, j)` of every bitonic stage over `n` elements, in dispatch order.
///
/// `n` must be a power of two.
fn bitonic_steps(n: u32) -> Vec<(u32, u32)> {
    let mut steps = Vec::new();
    let mut k = 2;
    while k <= n {
        let mut j = k / 2;
        while j > 0 {
            steps.push((k, j));
            j /= 2;
        }
        k *= 2;
    }
    steps
}

/// Prepare strategy running on compute shaders.
pub struct ComputePrepare {
    config: GrimConfig,
    reset_infos: wgpu::ComputePipeline,
    reset_bounds: wgpu::ComputePipeline,
    cull: wgpu::ComputePipeline,
    sort: wgpu::ComputePipeline,
    bounds: wgpu::ComputePipeline,
    commands: wgpu::ComputePipeline,
    params: wgpu::Buffer,
    raw: wgpu::Buffer,
    infos: wgpu::Buffer,
    counter: wgpu::Buffer,
    /// Keeps the step uniforms alive for `sort_groups`.
    _sort_params: wgpu::Buffer,
    reset_infos_group: wgpu::BindGroup,
    sort_groups: Vec<wgpu::BindGroup>,
}

impl ComputePrepare {
    /// Compiles the pipelines and allocates the persistent scratch buffers.
    #[must_use]
    pub fn new(device: &wgpu::Device, config: &GrimConfig) -> Self {
        let source = SHADER_SOURCE.replace("WORKGROUP_SIZE", &config.workgroup_size.to_string());
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("grim prepare shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let pipeline = |entry_point: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: None,
                module: &shader,
                entry_point,
            })
        };
        let reset_infos = pipeline("reset_infos");
        let reset_bounds = pipeline("reset_bounds");
        let cull = pipeline("cull_instances");
        let sort = pipeline("sort_step");
        let bounds = pipeline("compute_bounds");
        let commands = pipeline("generate_commands");

        let sort_capacity = config.sort_capacity();
        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("grim prepare params"),
            size: std::mem::size_of::<PrepareParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let raw = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("grim raw instances"),
            size: u64::from(config.max_instance_slots) * std::mem::size_of::<InstanceRecord>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let infos = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("grim instance infos"),
            size: u64::from(sort_capacity) * std::mem::size_of::<GpuInstanceInfo>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let counter = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("grim survivor counter"),
            size: std::mem::size_of::<u32>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        // One aligned uniform slice per sort stage.
        let steps = bitonic_steps(sort_capacity);
        let stride = u64::from(device.limits().min_uniform_buffer_offset_alignment)
            .max(std::mem::size_of::<SortStep>() as u64);
        let mut step_bytes = vec![0u8; (stride as usize) * steps.len().max(1)];
        for (index, &(k, j)) in steps.iter().enumerate() {
            let offset = index * stride as usize;
            let step = SortStep { k, j, _pad: [0; 2] };
            step_bytes[offset..offset + std::mem::size_of::<SortStep>()].copy_from_slice(bytemuck::bytes_of(&step));
        }
        let sort_params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("grim sort steps"),
            size: step_bytes.len() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: true,
        });
        sort_params.slice(..).get_mapped_range_mut().copy_from_slice(&step_bytes);
        sort_params.unmap();

        let sort_layout = sort.get_bind_group_layout(0);
        let sort_groups: Vec<wgpu::BindGroup> = (0..steps.len())
            .map(|index| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("grim sort step"),
                    layout: &sort_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 5,
                            resource: infos.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 10,
                            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                                buffer: &sort_params,
                                offset: index as u64 * stride,
                                size: NonZeroU64::new(std::mem::size_of::<SortStep>() as u64),
                            }),
                        },
                    ],
                })
            })
            .collect();

        let reset_infos_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("grim reset infos"),
            layout: &reset_infos.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: infos.as_entire_binding() },
            ],
        });

        debug!(
            sort_capacity,
            sort_steps = steps.len(),
            workgroup_size = config.workgroup_size,
            "compute prepare ready"
        );

        Self {
            config: config.clone(),
            reset_infos,
            reset_bounds,
            cull,
            sort,
            bounds,
            commands,
            params,
            raw,
            infos,
            counter,
            _sort_params: sort_params,
            reset_infos_group,
            sort_groups,
        }
    }

    fn workgroups(&self, threads: u32) -> u32 {
        threads.div_ceil(self.config.workgroup_size)
    }
}

impl PrepareBackend for ComputePrepare {
    fn kind(&self) -> PrepareBackendKind {
        PrepareBackendKind::Compute
    }

    fn prepare(&mut self, frame: &PrepareFrame<'_>, encoder: &mut wgpu::CommandEncoder) -> Option<PrepareOutput> {
        let (Some(lod_lists), Some(lod_infos), Some(batches)) =
            (frame.pools.lod_lists(), frame.pools.lod_infos(), frame.pools.batches())
        else {
            warn!("pool buffers not uploaded, skipping compute prepare");
            return None;
        };

        let instances = admitted(frame.instances, self.config.max_instance_slots);
        let raw_count = instances.len() as u32;
        if raw_count > 0 {
            frame.queue.write_buffer(&self.raw, 0, bytemuck::cast_slice(instances));
        }

        let sort_capacity = self.config.sort_capacity();
        let bound_count = self.config.bound_count();
        let params = PrepareParams {
            raw_count,
            sort_capacity,
            bound_count,
            command_count: self.config.max_batches,
        };
        frame.queue.write_buffer(&self.params, 0, bytemuck::bytes_of(&params));

        let buffers = FrameBuffers::new(frame.device, &self.config);
        let device = frame.device;
        let group = |label: &str, pipeline: &wgpu::ComputePipeline, entries: &[(u32, &wgpu::Buffer)]| {
            let entries: Vec<_> = entries
                .iter()
                .map(|&(binding, buffer)| wgpu::BindGroupEntry {
                    binding,
                    resource: buffer.as_entire_binding(),
                })
                .collect();
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &pipeline.get_bind_group_layout(0),
                entries: &entries,
            })
        };

        let reset_bounds_group = group("grim reset bounds", &self.reset_bounds, &[(0, &self.params), (7, &buffers.bounds)]);
        let cull_group = group(
            "grim cull",
            &self.cull,
            &[(0, &self.params), (1, lod_lists), (4, &self.raw), (5, &self.infos), (6, &self.counter)],
        );
        let bounds_group = group(
            "grim bounds",
            &self.bounds,
            &[
                (0, &self.params),
                (5, &self.infos),
                (6, &self.counter),
                (7, &buffers.bounds),
                (8, &buffers.instance_ids),
            ],
        );
        let commands_group = group(
            "grim commands",
            &self.commands,
            &[
                (0, &self.params),
                (1, lod_lists),
                (2, lod_infos),
                (3, batches),
                (7, &buffers.bounds),
                (9, &buffers.indirect),
            ],
        );

        encoder.clear_buffer(&self.counter, 0, None);
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("grim prepare"),
                timestamp_writes: None,
            });

            pass.set_pipeline(&self.reset_infos);
            pass.set_bind_group(0, &self.reset_infos_group, &[]);
            pass.dispatch_workgroups(self.workgroups(sort_capacity), 1, 1);

            pass.set_pipeline(&self.reset_bounds);
            pass.set_bind_group(0, &reset_bounds_group, &[]);
            pass.dispatch_workgroups(self.workgroups(bound_count), 1, 1);

            if raw_count > 0 {
                pass.set_pipeline(&self.cull);
                pass.set_bind_group(0, &cull_group, &[]);
                pass.dispatch_workgroups(self.workgroups(raw_count), 1, 1);

                pass.set_pipeline(&self.sort);
                for step in &self.sort_groups {
                    pass.set_bind_group(0, step, &[]);
                    pass.dispatch_workgroups(self.workgroups(sort_capacity), 1, 1);
                }

                // The survivor count is GPU-side, so cover the whole capacity.
                pass.set_pipeline(&self.bounds);
                pass.set_bind_group(0, &bounds_group, &[]);
                pass.dispatch_workgroups(self.workgroups(sort_capacity), 1, 1);

                pass.set_pipeline(&self.commands);
                pass.set_bind_group(0, &commands_group, &[]);
                pass.dispatch_workgroups(self.workgroups(bound_count), 1, 1);
            }
        }

        Some(PrepareOutput {
            buffers,
            survivors: None,
        })
    }
}
