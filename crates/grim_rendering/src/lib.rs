//! # GRIM Rendering
//!
//! GPU-driven instance rendering: a large, changing population of instances
//! becomes a handful of indexed-indirect draws per frame.
//!
//! ## Frame
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ sync        pending creates/destroys → pools → GPU mirror      │
//! │ prepare     pack key → sort → bounds → indirect commands       │
//! │ draw        group by (material, format, topology) → indirect   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Prepare runs either as compute passes or on the CPU; both produce the
//! same buckets and the same commands.
//!
//! The device must enable `INDIRECT_FIRST_INSTANCE`; see
//! [`GrimRenderer::REQUIRED_FEATURES`].
//!
//! ## Invariants
//!
//! - Archetype ids stay put until the archetype is destroyed
//! - Bounds partition the sorted instances into disjoint runs
//! - Invisible materials never get a batch
//! - Draw setups are bounded by unique material/format pairs

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod archetype;
pub mod config;
pub mod draw;
pub mod error;
pub mod external;
pub mod gpu_types;
pub mod pool_buffers;
pub mod prepare;
pub mod renderer;

pub use archetype::{
    ArchetypeDesc, ArchetypeHandle, ArchetypeInfo, ArchetypeRegistry, ArchetypeRequests, BufferId,
    MaterialId, MeshGroup, MeshLod, MeshSource, PoolMirror, SubMesh, SyncReport, VertexFormat,
    VertexFormatId, VertexStreamLayout,
};
pub use config::{GrimConfig, PrepareBackendKind};
pub use draw::{plan_draws, submit_plan, DrawFilter, DrawPlan, DrawStats};
pub use error::{GrimError, GrimResult};
pub use external::{
    BufferProvider, InstanceAllocator, MaterialSystem, MATERIAL_INVISIBLE, MATERIAL_TRANSPARENT,
};
pub use gpu_types::{
    DrawIndexedIndirectArgs, GpuInstanceBound, GpuInstanceInfo, InstanceRecord, MAX_INSTANCE_LODS,
};
pub use pool_buffers::PoolBuffers;
pub use prepare::{ComputePrepare, FrameBuffers, PrepareBackend, RenderState, SoftwarePrepare};
pub use renderer::GrimRenderer;
