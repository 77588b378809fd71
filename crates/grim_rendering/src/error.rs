//! # Renderer Error Types
//!
//! Content errors (bad archetype descriptions) and setup errors. Per-frame
//! conditions such as a material resolving to nothing are not errors; those
//! draws are skipped.

use thiserror::Error;

/// Errors that can occur in the instance renderer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GrimError {
    /// Archetype description has no vertex streams.
    #[error("archetype has no vertex buffer streams")]
    NoVertexStreams,

    /// Archetype description has no index buffer.
    #[error("archetype has no index buffer")]
    NoIndexBuffer,

    /// Stream count does not match the vertex format.
    #[error("vertex format expects {expected} mesh streams, description supplies {supplied}")]
    StreamCountMismatch {
        /// Non-instance streams in the vertex format.
        expected: usize,
        /// Buffers supplied by the description.
        supplied: usize,
    },

    /// Source mesh has more LODs than the renderer supports.
    #[error("archetype has {count} LODs, maximum is {max}")]
    TooManyLods {
        /// LODs in the description.
        count: usize,
        /// Supported maximum.
        max: usize,
    },

    /// Vertex format has no per-instance stream to carry instance ids.
    #[error("vertex format {0} has no instance-rate stream")]
    MissingInstanceStream(u32),

    /// A sub-mesh refers to a material slot the material group lacks.
    #[error("material slot {slot} out of range for material group of {len}")]
    MaterialSlotOutOfRange {
        /// Slot referenced by the sub-mesh.
        slot: u32,
        /// Size of the material group.
        len: usize,
    },

    /// A slot pool ran out of room.
    #[error("{pool} pool exhausted: capacity {capacity}")]
    PoolExhausted {
        /// Which pool.
        pool: &'static str,
        /// Its capacity.
        capacity: u32,
    },

    /// Device was created without a feature the indirect draws depend on.
    #[error("device lacks required features {0:?}")]
    MissingDeviceFeature(wgpu::Features),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read.
    #[error("failed to read configuration {path}: {reason}")]
    ConfigIo {
        /// File that failed.
        path: String,
        /// OS error text.
        reason: String,
    },

    /// Configuration file is not valid TOML for [`crate::GrimConfig`].
    #[error("failed to parse configuration: {0}")]
    ConfigParse(String),
}

/// Result type for renderer operations.
pub type GrimResult<T> = Result<T, GrimError>;
