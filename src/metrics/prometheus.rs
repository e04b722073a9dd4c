//! Prometheus metrics for selection policies.
//!
//! Counters are always incremented; registering them with a `Registry` is
//! only needed for exposition.
//!
//! # Usage
//!
//! ```ignore
//! // Counters work without a registry
//! let policy = RoundRobinPolicy::new(queues);
//!
//! // External registry for scraping
//! let registry = prometheus::Registry::new();
//! let policy = SelectionBuilder::new()
//!     .prometheus_registry(registry.clone())
//!     .build(queues)?;
//! ```

use prometheus::{IntCounter, IntGauge, Opts, Registry};

/// Prometheus metrics for one policy instance.
///
/// Clones share the same underlying counters.
#[derive(Clone)]
pub struct SelectionMetrics {
    /// Submissions registered but not yet reaped
    pub outstanding: IntGauge,

    /// Resources handed out by `select` (including implicit selections in `submit`)
    pub selections: IntCounter,

    /// Submissions registered in the submission group
    pub submissions: IntCounter,

    /// Callables that returned an error instead of a wait object
    pub submit_failures: IntCounter,

    /// Submissions waited on and reaped
    pub completions: IntCounter,

    /// Waits on submissions that had already been reaped
    pub double_waits: IntCounter,

    /// Auto-tune selections made while profiling
    pub warmup_selections: IntCounter,

    /// Auto-tune selections made from timing estimates
    pub tuned_selections: IntCounter,

    /// Auto-tune keys sent back to profiling after the resample interval
    pub resamples: IntCounter,

    /// Timing samples folded into auto-tune estimates
    pub timing_samples: IntCounter,
}

impl Default for SelectionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn counter(prefix: &str, name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(format!("{}_{}", prefix, name), help))
        .expect("metric creation should not fail")
}

impl SelectionMetrics {
    /// Create metrics with default prefix "dynsel".
    pub fn new() -> Self {
        Self::with_prefix("dynsel")
    }

    /// Create metrics with a custom prefix.
    ///
    /// Metric names will be `{prefix}_selections`, `{prefix}_outstanding`, etc.
    /// Characters that are not valid in a Prometheus metric name are replaced
    /// with underscores.
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = sanitize_prefix(prefix);
        Self {
            outstanding: IntGauge::with_opts(Opts::new(
                format!("{}_outstanding", prefix),
                "Submissions registered but not yet reaped",
            ))
            .expect("metric creation should not fail"),
            selections: counter(&prefix, "selections", "Resources selected"),
            submissions: counter(&prefix, "submissions", "Submissions registered"),
            submit_failures: counter(
                &prefix,
                "submit_failures",
                "Callables that failed before registration",
            ),
            completions: counter(&prefix, "completions", "Submissions waited on and reaped"),
            double_waits: counter(
                &prefix,
                "double_waits",
                "Waits on already reaped submissions",
            ),
            warmup_selections: counter(
                &prefix,
                "warmup_selections",
                "Auto-tune selections made while profiling",
            ),
            tuned_selections: counter(
                &prefix,
                "tuned_selections",
                "Auto-tune selections made from timing estimates",
            ),
            resamples: counter(&prefix, "resamples", "Auto-tune keys re-profiled"),
            timing_samples: counter(
                &prefix,
                "timing_samples",
                "Timing samples recorded by auto-tune",
            ),
        }
    }

    /// Register all metrics with a Registry for exposition.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register (e.g., duplicate names).
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.outstanding.clone()))?;
        registry.register(Box::new(self.selections.clone()))?;
        registry.register(Box::new(self.submissions.clone()))?;
        registry.register(Box::new(self.submit_failures.clone()))?;
        registry.register(Box::new(self.completions.clone()))?;
        registry.register(Box::new(self.double_waits.clone()))?;
        registry.register(Box::new(self.warmup_selections.clone()))?;
        registry.register(Box::new(self.tuned_selections.clone()))?;
        registry.register(Box::new(self.resamples.clone()))?;
        registry.register(Box::new(self.timing_samples.clone()))?;
        Ok(())
    }

    #[inline]
    pub(crate) fn record_submission(&self) {
        self.submissions.inc();
        self.outstanding.inc();
    }

    #[inline]
    pub(crate) fn record_completion(&self) {
        self.completions.inc();
        self.outstanding.dec();
    }

    /// Record an auto-tune decision.
    #[inline]
    pub(crate) fn record_tuning(&self, warmup: bool) {
        if warmup {
            self.warmup_selections.inc();
        } else {
            self.tuned_selections.inc();
        }
    }
}

/// Replace characters that are invalid in a Prometheus metric name.
///
/// Valid chars: `[a-zA-Z_:]` for the first char, `[a-zA-Z0-9_:]` for the rest.
fn sanitize_prefix(prefix: &str) -> String {
    prefix
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let valid = if i == 0 {
                c.is_ascii_alphabetic() || c == '_' || c == ':'
            } else {
                c.is_ascii_alphanumeric() || c == '_' || c == ':'
            };
            if valid {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl std::fmt::Debug for SelectionMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionMetrics")
            .field("outstanding", &self.outstanding.get())
            .field("selections", &self.selections.get())
            .field("submissions", &self.submissions.get())
            .field("completions", &self.completions.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = SelectionMetrics::new();
        assert_eq!(metrics.outstanding.get(), 0);
        assert_eq!(metrics.selections.get(), 0);
    }

    #[test]
    fn test_submission_lifecycle_counters() {
        let metrics = SelectionMetrics::new();

        metrics.record_submission();
        metrics.record_submission();
        assert_eq!(metrics.submissions.get(), 2);
        assert_eq!(metrics.outstanding.get(), 2);

        metrics.record_completion();
        assert_eq!(metrics.completions.get(), 1);
        assert_eq!(metrics.outstanding.get(), 1);
    }

    #[test]
    fn test_tuning_counters() {
        let metrics = SelectionMetrics::new();
        metrics.record_tuning(true);
        metrics.record_tuning(false);
        metrics.record_tuning(false);
        assert_eq!(metrics.warmup_selections.get(), 1);
        assert_eq!(metrics.tuned_selections.get(), 2);
    }

    #[test]
    fn test_registry_integration() {
        let metrics = SelectionMetrics::new();
        let registry = Registry::new();

        metrics
            .register(&registry)
            .expect("registration should succeed");
        metrics.selections.inc();

        let families = registry.gather();
        assert!(families.iter().any(|f| f.get_name() == "dynsel_selections"));
    }

    #[test]
    fn test_prefix_sanitized() {
        let metrics = SelectionMetrics::with_prefix("my-app");
        let registry = Registry::new();
        metrics.register(&registry).unwrap();

        let families = registry.gather();
        assert!(families.iter().any(|f| f.get_name() == "my_app_outstanding"));
        assert!(!families.iter().any(|f| f.get_name() == "dynsel_outstanding"));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        SelectionMetrics::new().register(&registry).unwrap();
        assert!(SelectionMetrics::new().register(&registry).is_err());
    }

    #[test]
    fn test_metrics_clone() {
        let metrics = SelectionMetrics::new();
        let cloned = metrics.clone();
        cloned.selections.inc();
        assert_eq!(metrics.selections.get(), 1);
    }

    #[test]
    fn test_sanitize_leading_digit() {
        assert_eq!(sanitize_prefix("9lives"), "_lives");
    }
}
