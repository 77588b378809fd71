//! # Renderer Configuration
//!
//! Pool capacities and backend selection, loaded once at startup from TOML.
//!
//! ```toml
//! backend = "software"
//! max_archetypes = 1024
//! max_instance_slots = 65536
//! debug_material_filter = "rock"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{GrimError, GrimResult};
use crate::gpu_types::{MAX_INSTANCE_LODS, MAX_PACKED_ARCHETYPES};

/// Largest workgroup count a single dispatch dimension accepts.
pub const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65_535;

/// Which prepare strategy runs each frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrepareBackendKind {
    /// Cull, sort, bounds and command generation in compute shaders.
    #[default]
    Compute,
    /// Same stages on the CPU, results written to GPU buffers.
    Software,
}

/// Renderer configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrimConfig {
    /// Prepare strategy.
    pub backend: PrepareBackendKind,
    /// Capacity of the LodList pool, i.e. maximum live archetypes.
    pub max_archetypes: u32,
    /// Capacity of the LodInfo pool.
    pub max_lod_infos: u32,
    /// Capacity of the IndexedBatch pool. Also the indirect command count.
    pub max_batches: u32,
    /// Capacity of the DrawInfo pool.
    pub max_draw_infos: u32,
    /// Instance slots the external allocator can hand out.
    pub max_instance_slots: u32,
    /// Threads per compute workgroup.
    pub workgroup_size: u32,
    /// Only draw materials whose name contains this string. Debug builds only.
    pub debug_material_filter: Option<String>,
}

impl Default for GrimConfig {
    fn default() -> Self {
        Self {
            backend: PrepareBackendKind::Compute,
            max_archetypes: 4096,
            max_lod_infos: 4096 * MAX_INSTANCE_LODS as u32,
            max_batches: 65_536,
            max_draw_infos: 65_536,
            max_instance_slots: 1 << 20,
            workgroup_size: 256,
            debug_material_filter: None,
        }
    }
}

impl GrimConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigParse` for malformed TOML and `InvalidConfig` for
    /// out-of-range values.
    pub fn from_toml_str(source: &str) -> GrimResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| GrimError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigIo` if the file cannot be read, otherwise as
    /// [`GrimConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> GrimResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| GrimError::ConfigIo {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks capacities against pool and dispatch limits.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> GrimResult<()> {
        let pools = [
            ("max_archetypes", self.max_archetypes),
            ("max_lod_infos", self.max_lod_infos),
            ("max_batches", self.max_batches),
            ("max_draw_infos", self.max_draw_infos),
            ("max_instance_slots", self.max_instance_slots),
        ];
        if let Some((name, _)) = pools.iter().find(|(_, value)| *value == 0) {
            return Err(GrimError::InvalidConfig(format!("{name} must be non-zero")));
        }

        if !self.workgroup_size.is_power_of_two() || !(32..=256).contains(&self.workgroup_size) {
            return Err(GrimError::InvalidConfig(format!(
                "workgroup_size {} must be a power of two in 32..=256",
                self.workgroup_size
            )));
        }

        if self.max_archetypes > MAX_PACKED_ARCHETYPES {
            return Err(GrimError::InvalidConfig(format!(
                "max_archetypes {} exceeds packed key range {MAX_PACKED_ARCHETYPES}",
                self.max_archetypes
            )));
        }

        let limit = u64::from(MAX_WORKGROUPS_PER_DIMENSION) * u64::from(self.workgroup_size);
        let dispatched = [
            ("max_instance_slots", u64::from(self.sort_capacity())),
            ("max_batches", u64::from(self.max_batches)),
            ("max_archetypes", u64::from(self.bound_count())),
        ];
        if let Some((name, _)) = dispatched.iter().find(|(_, n)| *n > limit) {
            return Err(GrimError::InvalidConfig(format!(
                "{name} exceeds one dispatch of {limit} threads"
            )));
        }

        Ok(())
    }

    /// Power-of-two padded instance capacity used by the sort.
    #[must_use]
    pub fn sort_capacity(&self) -> u32 {
        self.max_instance_slots.max(1).next_power_of_two()
    }

    /// Number of (archetype, lod) bound slots.
    #[must_use]
    pub fn bound_count(&self) -> u32 {
        self.max_archetypes * MAX_INSTANCE_LODS as u32
    }
}
