//! Builder for constructing policies from layered configuration.
//!
//! The builder supports multiple configuration sources using figment:
//! - Default values
//! - Config files (TOML, YAML, JSON)
//! - Environment variables
//! - Programmatic overrides
//! - CLI arguments via clap

use crate::config::{PolicyKind, SelectionConfig};
use crate::error::Result;
use crate::metrics::SelectionMetrics;
use crate::policy::{AnyPolicy, AutoTuneKnobs};
use crate::queue::{build_queues, ComputeQueue};
use crate::universe::{Init, Resource};

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use prometheus::Registry;
use std::path::Path;
use tracing::{debug, warn};

/// Builder for constructing an [`AnyPolicy`].
///
/// Configuration sources are merged in the following order (later sources override earlier):
/// 1. Default values
/// 2. Config files (in order added)
/// 3. Environment variables
/// 4. Programmatic overrides
/// 5. CLI arguments
///
/// # Examples
///
/// ```ignore
/// use dynsel::{PolicyKind, SelectionBuilder};
///
/// let policy = SelectionBuilder::new()
///     .file("dynsel.toml")
///     .env_prefix("DYNSEL")
///     .policy(PolicyKind::AutoTune)
///     .build_with_queues()?;
/// ```
pub struct SelectionBuilder {
    figment: Figment,
    prometheus_registry: Option<Registry>,
}

impl Default for SelectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SelectionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionBuilder")
            .field("figment", &self.figment)
            .field(
                "prometheus_registry",
                &self.prometheus_registry.as_ref().map(|_| "<Registry>"),
            )
            .finish()
    }
}

impl SelectionBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            figment: Figment::from(Serialized::defaults(SelectionConfig::default())),
            prometheus_registry: None,
        }
    }

    /// Add a configuration file.
    ///
    /// Supports TOML, YAML, and JSON formats (detected by extension).
    /// Files are merged in the order they are added.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        self.figment = match extension.to_lowercase().as_str() {
            "yaml" | "yml" => self.figment.merge(Yaml::file(path)),
            "json" => self.figment.merge(Json::file(path)),
            _ => self.figment.merge(Toml::file(path)),
        };
        self
    }

    /// Add environment variables with a prefix.
    ///
    /// Variables are expected as `{PREFIX}_{KEY}`; nested keys are separated
    /// by a double underscore.
    ///
    /// ```ignore
    /// // Reads DYNSEL_POLICY, DYNSEL_QUEUE_COUNT,
    /// // DYNSEL_AUTO_TUNE__SAMPLES_PER_RESOURCE, ...
    /// let builder = SelectionBuilder::new().env_prefix("DYNSEL");
    /// ```
    pub fn env_prefix(mut self, prefix: &str) -> Self {
        let prefix = format!("{}_", prefix.trim_end_matches('_'));
        self.figment = self.figment.merge(Env::prefixed(&prefix).split("__"));
        self
    }

    pub fn policy(mut self, kind: PolicyKind) -> Self {
        self.figment = self.figment.merge(Serialized::default("policy", kind));
        self
    }

    /// Offset selected by the fixed policy.
    pub fn fixed_offset(mut self, offset: usize) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("fixed_offset", offset));
        self
    }

    /// Set the auto-tune knobs. See [`AutoTuneKnobs`] for details.
    pub fn auto_tune_knobs(mut self, knobs: AutoTuneKnobs) -> Self {
        self.figment = self.figment.merge(Serialized::default("auto_tune", knobs));
        self
    }

    /// Prefix for metric names.
    pub fn metrics_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("metrics_prefix", prefix.into()));
        self
    }

    /// Name prefix for queues built by [`build_with_queues`](Self::build_with_queues).
    pub fn queue_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("queue_prefix", prefix.into()));
        self
    }

    pub fn queue_count(mut self, count: usize) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("queue_count", count));
        self
    }

    pub fn queue_threads(mut self, threads: usize) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("queue_threads", threads));
        self
    }

    /// Provide an external Prometheus registry for metrics exposition.
    ///
    /// The built policy registers its metrics here. A registration failure
    /// (for example a duplicate prefix) is logged and does not fail the build.
    pub fn prometheus_registry(mut self, registry: Registry) -> Self {
        self.prometheus_registry = Some(registry);
        self
    }

    /// Apply CLI argument overrides.
    ///
    /// This method applies any non-None values from the `SelectionArgs` struct.
    pub fn with_cli_args(mut self, args: &SelectionArgs) -> Self {
        if let Some(kind) = args.ds_policy {
            self.figment = self.figment.merge(Serialized::default("policy", kind));
        }
        if let Some(offset) = args.ds_fixed_offset {
            self.figment = self
                .figment
                .merge(Serialized::default("fixed_offset", offset));
        }
        if let Some(count) = args.ds_queue_count {
            self.figment = self
                .figment
                .merge(Serialized::default("queue_count", count));
        }
        if let Some(threads) = args.ds_queue_threads {
            self.figment = self
                .figment
                .merge(Serialized::default("queue_threads", threads));
        }
        if let Some(samples) = args.ds_warmup_samples {
            self.figment = self.figment.merge(Serialized::default(
                "auto_tune.samples_per_resource",
                samples,
            ));
        }
        if let Some(ms) = args.ds_resample_ms {
            self.figment = self
                .figment
                .merge(Serialized::default("auto_tune.resample_interval_ms", ms));
        }
        self
    }

    /// Extract the merged configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration extraction fails.
    pub fn config(&self) -> Result<SelectionConfig> {
        let mut config: SelectionConfig = self.figment.extract().map_err(Box::new)?;
        config.prometheus_registry = self.prometheus_registry.clone();
        Ok(config)
    }

    /// Build the configured policy over `init`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration extraction fails
    /// - The fixed offset is outside an eagerly supplied universe
    pub fn build<R: Resource>(self, init: impl Into<Init<R>>) -> Result<AnyPolicy<R>> {
        let config = self.config()?;
        policy_from_config(&config, init)
    }

    /// Build the configured compute queues and a policy over them.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration extraction, queue construction or
    /// policy construction fails.
    pub fn build_with_queues(self) -> Result<AnyPolicy<ComputeQueue>> {
        let config = self.config()?;
        let queues = build_queues(
            &config.queue_prefix,
            config.queue_count,
            config.queue_threads,
        )?;
        policy_from_config(&config, queues)
    }
}

fn policy_from_config<R: Resource>(
    config: &SelectionConfig,
    init: impl Into<Init<R>>,
) -> Result<AnyPolicy<R>> {
    let metrics = SelectionMetrics::with_prefix(&config.metrics_prefix);
    if let Some(registry) = &config.prometheus_registry {
        if let Err(e) = metrics.register(registry) {
            warn!(
                error = %e,
                prefix = %config.metrics_prefix,
                "failed to register selection metrics"
            );
        }
    }
    let policy = AnyPolicy::from_config(config, init, metrics)?;
    debug!(policy = %config.policy, "selection policy built");
    Ok(policy)
}

/// CLI arguments for dynsel configuration.
///
/// Use with clap's `Parser` derive macro. These arguments can be applied
/// to a `SelectionBuilder` using `with_cli_args`.
///
/// # Examples
///
/// ```ignore
/// use clap::Parser;
/// use dynsel::{SelectionArgs, SelectionBuilder};
///
/// #[derive(Parser)]
/// struct MyArgs {
///     #[command(flatten)]
///     selection: SelectionArgs,
/// }
///
/// let args = MyArgs::parse();
/// let policy = SelectionBuilder::new()
///     .with_cli_args(&args.selection)
///     .build_with_queues()?;
/// ```
#[derive(Debug, Default, Clone, clap::Args)]
pub struct SelectionArgs {
    /// Selection policy
    #[arg(long, value_enum)]
    pub ds_policy: Option<PolicyKind>,

    /// Offset used by the fixed policy
    #[arg(long)]
    pub ds_fixed_offset: Option<usize>,

    /// Number of compute queues
    #[arg(long)]
    pub ds_queue_count: Option<usize>,

    /// Worker threads per compute queue
    #[arg(long)]
    pub ds_queue_threads: Option<usize>,

    /// Auto-tune warm-up passes per resource
    #[arg(long)]
    pub ds_warmup_samples: Option<usize>,

    /// Auto-tune resample interval in milliseconds
    #[arg(long)]
    pub ds_resample_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Policy;
    use figment::Jail;

    #[test]
    fn test_builder_defaults() {
        let config: SelectionConfig = SelectionBuilder::new().figment.extract().unwrap();
        assert_eq!(config.policy, PolicyKind::RoundRobin);
        assert_eq!(config.queue_count, 2);
        assert!(config.auto_tune.is_none());
    }

    #[test]
    fn test_builder_programmatic_override() {
        let config: SelectionConfig = SelectionBuilder::new()
            .policy(PolicyKind::Fixed)
            .fixed_offset(3)
            .queue_count(5)
            .queue_threads(2)
            .metrics_prefix("myapp")
            .figment
            .extract()
            .unwrap();

        assert_eq!(config.policy, PolicyKind::Fixed);
        assert_eq!(config.fixed_offset, 3);
        assert_eq!(config.queue_count, 5);
        assert_eq!(config.queue_threads, 2);
        assert_eq!(config.metrics_prefix, "myapp");
    }

    #[test]
    fn test_builder_cli_args() {
        let args = SelectionArgs {
            ds_policy: Some(PolicyKind::AutoTune),
            ds_fixed_offset: None,
            ds_queue_count: Some(3),
            ds_queue_threads: None,
            ds_warmup_samples: Some(2),
            ds_resample_ms: Some(1000),
        };

        let config: SelectionConfig = SelectionBuilder::new()
            .policy(PolicyKind::Static)
            .queue_threads(4)
            .with_cli_args(&args)
            .figment
            .extract()
            .unwrap();

        // CLI args should override programmatic values
        assert_eq!(config.policy, PolicyKind::AutoTune);
        assert_eq!(config.queue_count, 3);
        assert_eq!(config.queue_threads, 4);
        let knobs = config.effective_auto_tune();
        assert_eq!(knobs.samples_per_resource, 2);
        assert_eq!(knobs.resample_interval_ms, Some(1000));
    }

    #[test]
    fn test_cli_knobs_merge_with_programmatic_knobs() {
        let args = SelectionArgs {
            ds_warmup_samples: Some(3),
            ..Default::default()
        };
        let knobs = AutoTuneKnobs::new()
            .with_samples_per_resource(1)
            .with_resample_interval(std::time::Duration::from_millis(50));
        let config: SelectionConfig = SelectionBuilder::new()
            .auto_tune_knobs(knobs)
            .with_cli_args(&args)
            .figment
            .extract()
            .unwrap();
        let knobs = config.effective_auto_tune();
        assert_eq!(knobs.samples_per_resource, 3);
        assert_eq!(knobs.resample_interval_ms, Some(50));
    }

    #[test]
    fn test_file_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "dynsel.toml",
                r#"
                    policy = "dynamic_load"
                    queue_count = 6
                    queue_threads = 2
                "#,
            )?;
            jail.set_env("DYNSEL_QUEUE_COUNT", "8");
            jail.set_env("DYNSEL_AUTO_TUNE__SAMPLES_PER_RESOURCE", "4");

            let config = SelectionBuilder::new()
                .file("dynsel.toml")
                .env_prefix("DYNSEL")
                .config()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.policy, PolicyKind::DynamicLoad);
            assert_eq!(config.queue_count, 8);
            assert_eq!(config.queue_threads, 2);
            assert_eq!(config.effective_auto_tune().samples_per_resource, 4);
            Ok(())
        });
    }

    #[test]
    fn test_yaml_file() {
        Jail::expect_with(|jail| {
            jail.create_file("dynsel.yaml", "policy: static\nmetrics_prefix: yaml_app\n")?;
            let config = SelectionBuilder::new()
                .file("dynsel.yaml")
                .config()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.policy, PolicyKind::Static);
            assert_eq!(config.metrics_prefix, "yaml_app");
            Ok(())
        });
    }

    #[test]
    fn test_invalid_policy_is_config_error() {
        Jail::expect_with(|jail| {
            jail.create_file("bad.json", r#"{ "policy": "fastest" }"#)?;
            let result = SelectionBuilder::new().file("bad.json").config();
            assert!(matches!(result, Err(crate::error::DsError::Config(_))));
            Ok(())
        });
    }

    #[test]
    fn test_build_registers_metrics() {
        let registry = Registry::new();
        let policy = SelectionBuilder::new()
            .policy(PolicyKind::Static)
            .metrics_prefix("built")
            .prometheus_registry(registry.clone())
            .build(vec![1, 2])
            .unwrap();

        policy.select_with(None).unwrap();
        let families = registry.gather();
        assert!(families.iter().any(|f| f.get_name() == "built_selections"));
    }

    #[test]
    fn test_build_with_queues() {
        let policy = SelectionBuilder::new()
            .queue_prefix("bq")
            .queue_count(3)
            .build_with_queues()
            .unwrap();
        let names: Vec<String> = policy
            .get_resources()
            .iter()
            .map(|q| q.name().to_string())
            .collect();
        assert_eq!(names, vec!["bq-q0", "bq-q1", "bq-q2"]);
    }
}
