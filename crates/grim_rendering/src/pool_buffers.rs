//! GPU copies of the registry pools.
//!
//! The compute prepare path reads LodLists, LodInfos and IndexedBatches
//! from storage buffers. Uploads only happen when the registry's pool
//! revision moved, so a frame without archetype changes writes nothing.

use tracing::{debug, trace};

use crate::archetype::PoolMirror;
use crate::gpu_types::{GpuIndexedBatch, GpuLodInfo, GpuLodList};

/// Smallest entry count a pool buffer is created with.
const MIN_ENTRIES: usize = 64;

/// One storage buffer that grows by powers of two.
struct GrowableBuffer {
    label: &'static str,
    buffer: Option<wgpu::Buffer>,
    capacity: usize,
}

impl GrowableBuffer {
    const fn new(label: &'static str) -> Self {
        Self { label, buffer: None, capacity: 0 }
    }

    /// Writes `data`, reallocating first if it does not fit.
    ///
    /// Returns true if the buffer was reallocated.
    fn write<T: bytemuck::Pod>(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, data: &[T], empty: T) -> bool {
        let needed = data.len().max(MIN_ENTRIES).next_power_of_two();
        let grown = self.buffer.is_none() || needed > self.capacity;
        if grown {
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(self.label),
                size: (needed * std::mem::size_of::<T>()) as u64,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            debug!(pool = self.label, entries = needed, "pool buffer allocated");
            self.buffer = Some(buffer);
            self.capacity = needed;
        }

        if let Some(buffer) = &self.buffer {
            // Entries past the mirror must read as empty.
            let mut padded = Vec::with_capacity(self.capacity);
            padded.extend_from_slice(data);
            padded.resize(self.capacity, empty);
            queue.write_buffer(buffer, 0, bytemuck::cast_slice(&padded));
        }
        grown
    }
}

/// Storage buffers holding the uploaded pool mirror.
pub struct PoolBuffers {
    lod_lists: GrowableBuffer,
    lod_infos: GrowableBuffer,
    batches: GrowableBuffer,
    uploaded_revision: Option<u64>,
    upload_count: u64,
}

impl Default for PoolBuffers {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolBuffers {
    /// Creates the set with nothing allocated. The first upload allocates.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lod_lists: GrowableBuffer::new("grim lod lists"),
            lod_infos: GrowableBuffer::new("grim lod infos"),
            batches: GrowableBuffer::new("grim indexed batches"),
            uploaded_revision: None,
            upload_count: 0,
        }
    }

    /// Uploads `mirror` unless `revision` was already uploaded.
    ///
    /// Returns true if anything was written.
    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, mirror: &PoolMirror, revision: u64) -> bool {
        if self.uploaded_revision == Some(revision) {
            return false;
        }

        self.lod_lists.write(device, queue, &mirror.lod_lists, GpuLodList::EMPTY);
        self.lod_infos.write(device, queue, &mirror.lod_infos, GpuLodInfo::EMPTY);
        self.batches.write(device, queue, &mirror.batches, GpuIndexedBatch::EMPTY);

        self.uploaded_revision = Some(revision);
        self.upload_count += 1;
        trace!(
            revision,
            lod_lists = mirror.lod_lists.len(),
            lod_infos = mirror.lod_infos.len(),
            batches = mirror.batches.len(),
            "pool mirror uploaded"
        );
        true
    }

    /// Revision last uploaded.
    #[must_use]
    pub const fn uploaded_revision(&self) -> Option<u64> {
        self.uploaded_revision
    }

    /// Uploads performed so far.
    #[must_use]
    pub const fn upload_count(&self) -> u64 {
        self.upload_count
    }

    /// LodList storage buffer, once uploaded.
    #[must_use]
    pub fn lod_lists(&self) -> Option<&wgpu::Buffer> {
        self.lod_lists.buffer.as_ref()
    }

    /// LodInfo storage buffer, once uploaded.
    #[must_use]
    pub fn lod_infos(&self) -> Option<&wgpu::Buffer> {
        self.lod_infos.buffer.as_ref()
    }

    /// IndexedBatch storage buffer, once uploaded.
    #[must_use]
    pub fn batches(&self) -> Option<&wgpu::Buffer> {
        self.batches.buffer.as_ref()
    }
}
