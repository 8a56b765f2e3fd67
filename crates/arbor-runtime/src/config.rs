//! Runtime configuration loading and management.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::execution::UnknownTypePolicy;

/// Runtime configuration, loaded from .arbor/config.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Config version
    pub version: Option<String>,

    /// Maximum nesting of subtree references during resolution
    #[serde(default = "default_max_ref_depth")]
    pub max_ref_depth: usize,

    /// Snapshots retained per instance; 0 disables history
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Interval used by fixed-interval scheduling when none is given
    #[serde(default = "default_interval_ms")]
    pub default_interval_ms: u64,

    /// What the builder does with node types the factory does not know
    #[serde(default)]
    pub unknown_node_policy: UnknownTypePolicy,

    /// Instances inactive for longer than this are removed by `cleanup_idle`
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,

    /// Attach a debug controller to new instances
    #[serde(default = "default_debug_enabled")]
    pub debug_enabled: bool,

    /// Seed for deterministic node randomness
    #[serde(default)]
    pub seed: u64,
}

fn default_max_ref_depth() -> usize {
    100
}
fn default_history_capacity() -> usize {
    1000
}
fn default_interval_ms() -> u64 {
    100
}
fn default_debug_enabled() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            version: None,
            max_ref_depth: default_max_ref_depth(),
            history_capacity: default_history_capacity(),
            default_interval_ms: default_interval_ms(),
            unknown_node_policy: UnknownTypePolicy::default(),
            idle_timeout_secs: None,
            debug_enabled: default_debug_enabled(),
            seed: 0,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        Ok(config)
    }

    /// Load configuration from project root, falling back to defaults
    pub fn load_from_project(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(".arbor/config.yaml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn default_interval(&self) -> Duration {
        Duration::from_millis(self.default_interval_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}
