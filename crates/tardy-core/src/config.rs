use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::event::EventKind;

/// Top-level `tardy.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TardyConfig {
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Parallel per-position workers. Values below 1 are treated as 1.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Suffix of the tenant-scoped state namespace.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            namespace: default_namespace(),
        }
    }
}

impl ReconcileConfig {
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        self.workers.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Event kinds that have a registered listener.
    #[serde(default = "default_listen")]
    pub listen: Vec<EventKind>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

const fn default_workers() -> usize {
    4
}

fn default_namespace() -> String {
    "delinquency".to_string()
}

fn default_listen() -> Vec<EventKind> {
    EventKind::ALL.to_vec()
}

/// Load `tardy.toml` from `path`; a missing file yields the defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<TardyConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(TardyConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<TardyConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}
