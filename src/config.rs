//! Configuration types for dynsel policies.

use serde::{Deserialize, Serialize};

use crate::policy::AutoTuneKnobs;
use prometheus::Registry;

/// Which selection policy to build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Always the first resource
    Static,
    /// The resource at `fixed_offset`
    Fixed,
    /// Resources in turn
    #[default]
    RoundRobin,
    /// The resource with the fewest submissions in flight
    DynamicLoad,
    /// The fastest resource per function key, after profiling
    AutoTune,
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PolicyKind::Static => "static",
            PolicyKind::Fixed => "fixed",
            PolicyKind::RoundRobin => "round_robin",
            PolicyKind::DynamicLoad => "dynamic_load",
            PolicyKind::AutoTune => "auto_tune",
        };
        f.write_str(name)
    }
}

/// Configuration for a selection policy and, optionally, the compute queues
/// it selects from.
///
/// This struct can be deserialized from TOML, YAML, JSON, or environment
/// variables using figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelectionConfig {
    /// Policy to build (default: round_robin)
    #[serde(default)]
    pub policy: PolicyKind,

    /// Offset used by the fixed policy (default: 0)
    #[serde(default)]
    pub fixed_offset: usize,

    /// Auto-tune knobs.
    /// If None, default knobs are used.
    #[serde(default)]
    pub auto_tune: Option<AutoTuneKnobs>,

    /// Prefix for metric names (default: "dynsel")
    #[serde(default = "default_prefix")]
    pub metrics_prefix: String,

    /// Name prefix for queues built from this configuration (default: "dynsel")
    #[serde(default = "default_prefix")]
    pub queue_prefix: String,

    /// Number of compute queues to build (default: 2)
    #[serde(default = "default_queue_count")]
    pub queue_count: usize,

    /// Worker threads per compute queue (default: 1)
    #[serde(default = "default_queue_threads")]
    pub queue_threads: usize,

    /// Prometheus registry for metrics exposition.
    /// Not serializable - must be set programmatically.
    #[serde(skip)]
    pub prometheus_registry: Option<Registry>,
}

fn default_prefix() -> String {
    "dynsel".to_string()
}

fn default_queue_count() -> usize {
    2
}

fn default_queue_threads() -> usize {
    1
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::default(),
            fixed_offset: 0,
            auto_tune: None,
            metrics_prefix: default_prefix(),
            queue_prefix: default_prefix(),
            queue_count: default_queue_count(),
            queue_threads: default_queue_threads(),
            prometheus_registry: None,
        }
    }
}

impl SelectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Auto-tune knobs, falling back to the defaults.
    pub fn effective_auto_tune(&self) -> AutoTuneKnobs {
        self.auto_tune.clone().unwrap_or_default()
    }
}
