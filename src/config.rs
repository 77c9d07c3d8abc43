//! Engine-wide tunables.
//!
//! Mirrors `orca::config`'s load pattern (defaults overridable by an
//! optional TOML file) but scoped to the handful of constants the
//! reference implementation hardcodes as module constants: default batch
//! size, default queue capacity, and observer refresh cadence.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Engine-wide tunables, loadable from an optional TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineTunables {
    /// Batch size used by an `Extractor` whose configuration doesn't set one.
    pub default_batch_size: usize,

    /// Queue capacity (in batches) used when a node's `queue_max_size` is unset.
    pub default_queue_max_size: usize,

    /// How often the progress observer re-checks terminal-loader counters.
    pub progress_refresh_interval_secs: f64,

    /// How often the timings observer recomputes and logs aggregates.
    pub timings_refresh_interval_secs: f64,

    /// Number of recent per-item timing samples kept per node.
    pub timings_ring_buffer_capacity: usize,
}

impl Default for EngineTunables {
    fn default() -> Self {
        Self {
            default_batch_size: 1000,
            default_queue_max_size: 10_000,
            progress_refresh_interval_secs: 2.5,
            timings_refresh_interval_secs: 5.0,
            timings_ring_buffer_capacity: 100,
        }
    }
}

impl EngineTunables {
    /// Load tunables, merging an optional TOML file over the defaults.
    ///
    /// A missing file is not an error: the defaults are used as-is, the
    /// same fallback behavior as `orca::config::ConfigLoader` when a
    /// config location doesn't exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut tunables = Self::default();

        if let Some(path) = path {
            if path.exists() {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    crate::error::EngineError::Config(format!(
                        "failed to read tunables file {}: {e}",
                        path.display()
                    ))
                })?;
                tunables = toml::from_str(&contents).map_err(|e| {
                    crate::error::EngineError::Config(format!(
                        "failed to parse tunables file {}: {e}",
                        path.display()
                    ))
                })?;
            }
        }

        Ok(tunables)
    }
}
