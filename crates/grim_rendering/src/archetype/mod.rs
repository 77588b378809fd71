//! # Archetypes
//!
//! An archetype is a mesh template with shared buffers and a vertex layout.
//! The registry turns each one into a LOD / batch / draw tree stored in
//! fixed-capacity pools, and keeps a GPU-layout mirror of those pools.

mod desc;
mod mirror;
mod registry;

pub use desc::{
    ArchetypeDesc, ArchetypeInfo, BufferId, MaterialId, MeshGroup, MeshLod, MeshSource, SubMesh,
    VertexFormat, VertexFormatId, VertexStreamLayout,
};
pub use mirror::PoolMirror;
pub use registry::{
    ArchetypeHandle, ArchetypeRegistry, ArchetypeRequests, DrawInfo, IndexedBatch, LodInfo, LodList,
    SyncReport,
};
