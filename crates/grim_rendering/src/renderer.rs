//! # GRIM Renderer
//!
//! The context object tying the pieces together. One per device, created at
//! startup and held by the host's render loop:
//!
//! ```text
//! any thread          render thread (once per frame)
//! ──────────          ──────────────────────────────
//! create_archetype ─► sync_archetypes ─► prepare_draw ─► draw
//! destroy_archetype        │                  │           │
//!                    pools + upload     FrameBuffers   indirect draws
//! ```

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::archetype::{ArchetypeDesc, ArchetypeHandle, ArchetypeRegistry, ArchetypeRequests, SyncReport};
use crate::config::{GrimConfig, PrepareBackendKind};
use crate::draw::{plan_draws, submit_plan, DrawFilter, DrawStats};
use crate::error::{GrimError, GrimResult};
use crate::external::{BufferProvider, InstanceAllocator, MaterialSystem};
use crate::pool_buffers::PoolBuffers;
use crate::prepare::software::visible_archetypes;
use crate::prepare::{create_backend, PrepareBackend, PrepareFrame, RenderState};

/// GPU-driven instance renderer.
///
/// The device must be created with [`GrimRenderer::REQUIRED_FEATURES`].
/// Every indirect command starts at its bucket's offset in the sorted
/// instance-id buffer via `first_instance`, which wgpu ignores unless
/// `INDIRECT_FIRST_INSTANCE` is enabled.
pub struct GrimRenderer {
    config: GrimConfig,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    registry: ArchetypeRegistry,
    pools: PoolBuffers,
    backend: Box<dyn PrepareBackend>,
}

impl GrimRenderer {
    /// Device features the renderer cannot draw correctly without.
    pub const REQUIRED_FEATURES: wgpu::Features = wgpu::Features::INDIRECT_FIRST_INSTANCE;

    /// Validates `config` and the device, then builds the registry and
    /// prepare backend.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if a capacity or the workgroup size is unusable,
    /// `MissingDeviceFeature` if `device` lacks [`Self::REQUIRED_FEATURES`].
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, config: GrimConfig) -> GrimResult<Self> {
        config.validate()?;
        check_features(device.features())?;

        let registry = ArchetypeRegistry::new(&config);
        let backend = create_backend(&device, &config);
        info!(
            backend = ?config.backend,
            max_archetypes = config.max_archetypes,
            max_batches = config.max_batches,
            max_instance_slots = config.max_instance_slots,
            "GRIM renderer ready"
        );

        Ok(Self {
            config,
            device,
            queue,
            registry,
            pools: PoolBuffers::new(),
            backend,
        })
    }

    /// Handle for creating and destroying archetypes from other threads.
    #[must_use]
    pub fn requests(&self) -> ArchetypeRequests {
        self.registry.requests()
    }

    /// Queues an archetype for the next sync.
    ///
    /// # Errors
    ///
    /// Content errors in `desc`, or `PoolExhausted` when no archetype slot
    /// is free.
    pub fn create_archetype(&self, desc: ArchetypeDesc) -> GrimResult<ArchetypeHandle> {
        self.registry.create_archetype(desc)
    }

    /// Queues an archetype's destruction for the next sync.
    pub fn destroy_archetype(&self, handle: ArchetypeHandle) {
        self.registry.destroy_archetype(handle);
    }

    /// Applies pending archetype changes and uploads the pools if they
    /// changed. Call once per frame before [`GrimRenderer::prepare_draw`].
    pub fn sync_archetypes<M: MaterialSystem + ?Sized>(&mut self, materials: &M) -> SyncReport {
        let report = self.registry.sync(materials);
        let uploaded = self.pools.upload(
            &self.device,
            &self.queue,
            self.registry.mirror(),
            self.registry.pool_revision(),
        );
        if uploaded {
            debug!(revision = self.registry.pool_revision(), "pool buffers resynced");
        }
        report
    }

    /// Records (compute) or performs (software) the prepare stages for the
    /// allocator's current population.
    ///
    /// The returned state feeds exactly one [`GrimRenderer::draw`].
    pub fn prepare_draw<A: InstanceAllocator + ?Sized>(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        allocator: &A,
    ) -> RenderState {
        let kind = self.backend.kind();
        let capacity = self.config.max_archetypes as usize;
        if allocator.instance_count() == 0 {
            return RenderState::empty(kind, capacity);
        }

        let visible = visible_archetypes(&self.registry, allocator, capacity);
        if visible.is_empty() {
            return RenderState::empty(kind, capacity);
        }

        let frame = PrepareFrame {
            device: &self.device,
            queue: &self.queue,
            mirror: self.registry.mirror(),
            pools: &self.pools,
            instances: allocator.instances(),
        };
        encoder.push_debug_group("grim::prepare");
        let output = self.backend.prepare(&frame, encoder);
        encoder.pop_debug_group();

        match output {
            Some(output) => RenderState {
                buffers: Some(output.buffers),
                visible_archetypes: visible,
                survivors: output.survivors,
                backend: kind,
            },
            None => RenderState::empty(kind, capacity),
        }
    }

    /// Draws everything `state` prepared, skipping materials that carry any
    /// of `exclude_flags`.
    pub fn draw<'a, M, B>(
        &self,
        pass: &mut wgpu::RenderPass<'a>,
        state: &'a RenderState,
        materials: &'a M,
        buffers: &'a B,
        exclude_flags: u32,
    ) -> DrawStats
    where
        M: MaterialSystem + ?Sized,
        B: BufferProvider + ?Sized,
    {
        if state.is_empty() {
            return DrawStats::default();
        }

        let filter = DrawFilter {
            exclude_flags,
            name_filter: if cfg!(debug_assertions) {
                self.config.debug_material_filter.clone()
            } else {
                None
            },
        };
        let plan = plan_draws(&self.registry, &state.visible_archetypes, materials, &filter);
        submit_plan(&plan, pass, state, materials, buffers)
    }

    /// Swaps the prepare strategy. Takes effect from the next prepare.
    pub fn set_backend(&mut self, kind: PrepareBackendKind) {
        if kind == self.backend.kind() {
            return;
        }
        self.config.backend = kind;
        self.backend = create_backend(&self.device, &self.config);
        info!(backend = ?kind, "prepare backend switched");
    }

    /// Active prepare strategy.
    #[must_use]
    pub fn backend_kind(&self) -> PrepareBackendKind {
        self.backend.kind()
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &GrimConfig {
        &self.config
    }

    /// The archetype registry.
    #[must_use]
    pub fn registry(&self) -> &ArchetypeRegistry {
        &self.registry
    }

    /// GPU copies of the registry pools.
    #[must_use]
    pub fn pool_buffers(&self) -> &PoolBuffers {
        &self.pools
    }
}

fn check_features(features: wgpu::Features) -> GrimResult<()> {
    let missing = GrimRenderer::REQUIRED_FEATURES - features;
    if missing.is_empty() {
        Ok(())
    } else {
        error!(?missing, "device is missing required features");
        Err(GrimError::MissingDeviceFeature(missing))
    }
}
