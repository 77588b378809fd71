//! # Prepare Pipeline
//!
//! Turns the frame's instance population into three GPU buffers:
//!
//! 1. **instance ids**: surviving ids sorted by `(archetype, lod)`
//! 2. **bounds**: `[first, last)` of each `(archetype, lod)` run
//! 3. **indirect**: one indexed-indirect command per batch slot
//!
//! Two strategies implement [`PrepareBackend`]: [`ComputePrepare`] records
//! compute passes and never reads anything back, [`SoftwarePrepare`] runs
//! the same stages on the CPU and writes the results.

mod compute;
pub mod software;

pub use compute::ComputePrepare;
pub use software::SoftwarePrepare;

use grim_core::BitSet;
use tracing::warn;

use crate::archetype::PoolMirror;
use crate::config::{GrimConfig, PrepareBackendKind};
use crate::gpu_types::{DrawIndexedIndirectArgs, GpuInstanceBound, InstanceRecord};
use crate::pool_buffers::PoolBuffers;

/// Per-frame output buffers, allocated fresh by every prepare.
pub struct FrameBuffers {
    /// Sorted instance ids. Bound at the instance stream slot.
    pub instance_ids: wgpu::Buffer,
    /// One [`DrawIndexedIndirectArgs`] per batch slot.
    pub indirect: wgpu::Buffer,
    /// One [`GpuInstanceBound`] per `(archetype, lod)` slot.
    pub bounds: wgpu::Buffer,
}

impl FrameBuffers {
    /// Allocates zeroed buffers sized by `config`.
    #[must_use]
    pub fn new(device: &wgpu::Device, config: &GrimConfig) -> Self {
        let instance_ids = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("grim instance ids"),
            size: u64::from(config.sort_capacity()) * std::mem::size_of::<u32>() as u64,
            usage: wgpu::BufferUsages::VERTEX
                | wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let indirect = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("grim indirect commands"),
            size: u64::from(config.max_batches) * DrawIndexedIndirectArgs::SIZE,
            usage: wgpu::BufferUsages::INDIRECT
                | wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let bounds = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("grim instance bounds"),
            size: u64::from(config.bound_count()) * std::mem::size_of::<GpuInstanceBound>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        Self { instance_ids, indirect, bounds }
    }
}

/// Inputs of one prepare.
pub struct PrepareFrame<'a> {
    /// Device for buffer and bind group creation.
    pub device: &'a wgpu::Device,
    /// Queue for buffer writes.
    pub queue: &'a wgpu::Queue,
    /// Pools as of the last sync.
    pub mirror: &'a PoolMirror,
    /// GPU copies of `mirror`.
    pub pools: &'a PoolBuffers,
    /// Raw population from the instance allocator.
    pub instances: &'a [InstanceRecord],
}

/// What a backend produced.
pub struct PrepareOutput {
    /// The frame's buffers.
    pub buffers: FrameBuffers,
    /// Surviving instance count, if the backend knows it on the CPU.
    pub survivors: Option<u32>,
}

/// A prepare strategy.
pub trait PrepareBackend: Send {
    /// Which strategy this is.
    fn kind(&self) -> PrepareBackendKind;

    /// Records or performs pack, sort, bounds and command generation.
    ///
    /// Returns None if a required GPU resource is missing; the frame then
    /// draws nothing.
    fn prepare(&mut self, frame: &PrepareFrame<'_>, encoder: &mut wgpu::CommandEncoder) -> Option<PrepareOutput>;
}

/// The part of the population a prepare admits: the first `limit` records.
fn admitted(instances: &[InstanceRecord], limit: u32) -> &[InstanceRecord] {
    let limit = limit as usize;
    if instances.len() > limit {
        warn!(instances = instances.len(), limit, "instance population truncated");
        &instances[..limit]
    } else {
        instances
    }
}

/// Builds the strategy selected by `config.backend`.
#[must_use]
pub fn create_backend(device: &wgpu::Device, config: &GrimConfig) -> Box<dyn PrepareBackend> {
    match config.backend {
        PrepareBackendKind::Compute => Box::new(ComputePrepare::new(device, config)),
        PrepareBackendKind::Software => Box::new(SoftwarePrepare::new(config)),
    }
}

/// Everything the paired draw call needs from one prepare.
pub struct RenderState {
    /// Frame buffers. None when nothing was prepared.
    pub buffers: Option<FrameBuffers>,
    /// Archetypes with at least one assigned instance.
    pub visible_archetypes: BitSet,
    /// Surviving instances, when known on the CPU.
    pub survivors: Option<u32>,
    /// Strategy that produced the buffers.
    pub backend: PrepareBackendKind,
}

impl RenderState {
    /// A state that draws nothing.
    #[must_use]
    pub fn empty(backend: PrepareBackendKind, archetype_capacity: usize) -> Self {
        Self {
            buffers: None,
            visible_archetypes: BitSet::new(archetype_capacity),
            survivors: None,
            backend,
        }
    }

    /// True if drawing this state would issue nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_none() || self.visible_archetypes.is_empty() || self.survivors == Some(0)
    }
}
