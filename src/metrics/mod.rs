//! Metrics collection for selection policies.
//!
//! Every policy owns a [`SelectionMetrics`] instance. Metrics are always
//! collected and can optionally be exposed through a Prometheus registry.
//!
//! # Available Metrics
//!
//! ## Gauges
//!
//! - `dynsel_outstanding` - Submissions registered but not yet reaped
//!
//! ## Counters
//!
//! - `dynsel_selections` - Resources selected
//! - `dynsel_submissions` - Submissions registered
//! - `dynsel_submit_failures` - Callables that failed before registration
//! - `dynsel_completions` - Submissions waited on and reaped
//! - `dynsel_double_waits` - Waits on already reaped submissions
//! - `dynsel_warmup_selections` - Auto-tune selections made while profiling
//! - `dynsel_tuned_selections` - Auto-tune selections made from timing estimates
//! - `dynsel_resamples` - Auto-tune keys re-profiled
//! - `dynsel_timing_samples` - Timing samples recorded by auto-tune
//!
//! # Example
//!
//! ```ignore
//! use prometheus::{Registry, TextEncoder};
//!
//! let registry = Registry::new();
//! let policy = SelectionBuilder::new()
//!     .prometheus_registry(registry.clone())
//!     .build(queues)?;
//!
//! let mut buffer = String::new();
//! TextEncoder::new().encode_utf8(&registry.gather(), &mut buffer)?;
//! ```

mod prometheus;

pub use prometheus::SelectionMetrics;
