//! Configuration knobs for the auto-tune policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Weight used by `Ema` when the configured `alpha` is not a finite number.
const DEFAULT_EMA_ALPHA: f64 = 0.1;

/// How timing samples for one (function key, resource) pair are combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimingSmoothing {
    /// Arithmetic mean of every sample.
    #[default]
    RunningMean,
    /// Exponential moving average; `alpha` is the weight of the newest sample.
    /// A non-finite `alpha` falls back to 0.1.
    Ema { alpha: f64 },
    /// Only the most recent sample counts.
    Latest,
}

impl TimingSmoothing {
    /// Fold `sample` into `estimate`, which already holds `samples` samples.
    pub fn apply(&self, estimate: f64, samples: u64, sample: f64) -> f64 {
        if samples == 0 {
            return sample;
        }
        match *self {
            TimingSmoothing::RunningMean => {
                let n = samples as f64;
                (estimate * n + sample) / (n + 1.0)
            }
            TimingSmoothing::Ema { alpha } => {
                let alpha = if alpha.is_finite() {
                    alpha.clamp(f64::EPSILON, 1.0)
                } else {
                    DEFAULT_EMA_ALPHA
                };
                alpha * sample + (1.0 - alpha) * estimate
            }
            TimingSmoothing::Latest => sample,
        }
    }
}

/// Knobs controlling warm-up and re-profiling.
///
/// # Phases
///
/// Each function key starts in warm-up: selections walk the universe in
/// order, `samples_per_resource` times over. After that the key exploits:
/// every selection goes to the resource with the lowest timing estimate.
/// With a resample interval, a key that has been exploiting for longer than
/// the interval goes back to warm-up so that changed conditions are noticed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoTuneKnobs {
    /// Warm-up passes over the universe per function key.
    /// Default: 1
    pub samples_per_resource: usize,

    /// Milliseconds of exploitation after which a key is profiled again.
    /// Default: None (never). Zero also means never.
    pub resample_interval_ms: Option<u64>,

    /// How samples are combined into an estimate.
    /// Default: running mean
    pub smoothing: TimingSmoothing,
}

impl Default for AutoTuneKnobs {
    fn default() -> Self {
        Self {
            samples_per_resource: 1,
            resample_interval_ms: None,
            smoothing: TimingSmoothing::RunningMean,
        }
    }
}

impl AutoTuneKnobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_samples_per_resource(mut self, samples: usize) -> Self {
        self.samples_per_resource = samples;
        self
    }

    /// Re-profile after `interval`, rounded up to whole milliseconds.
    ///
    /// A zero interval disables resampling.
    pub fn with_resample_interval(mut self, interval: Duration) -> Self {
        let ms = interval.as_nanos().div_ceil(1_000_000);
        self.resample_interval_ms = Some(u64::try_from(ms).unwrap_or(u64::MAX));
        self
    }

    pub fn with_smoothing(mut self, smoothing: TimingSmoothing) -> Self {
        self.smoothing = smoothing;
        self
    }

    /// Number of warm-up selections for a universe of `resources` entries.
    ///
    /// At least one pass is always made.
    pub fn warmup_len(&self, resources: usize) -> usize {
        resources * self.samples_per_resource.max(1)
    }

    /// The resample interval, or `None` when resampling is off.
    pub fn resample_interval(&self) -> Option<Duration> {
        self.resample_interval_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_knobs() {
        let knobs = AutoTuneKnobs::default();
        assert_eq!(knobs.samples_per_resource, 1);
        assert!(knobs.resample_interval().is_none());
        assert_eq!(knobs.smoothing, TimingSmoothing::RunningMean);
        assert_eq!(knobs.warmup_len(4), 4);
    }

    #[test]
    fn test_builder_methods() {
        let knobs = AutoTuneKnobs::new()
            .with_samples_per_resource(2)
            .with_resample_interval(Duration::from_millis(250))
            .with_smoothing(TimingSmoothing::Latest);
        assert_eq!(knobs.warmup_len(4), 8);
        assert_eq!(knobs.resample_interval(), Some(Duration::from_millis(250)));
        assert_eq!(knobs.smoothing, TimingSmoothing::Latest);
    }

    #[test]
    fn test_zero_samples_still_warms_up_once() {
        let knobs = AutoTuneKnobs::new().with_samples_per_resource(0);
        assert_eq!(knobs.warmup_len(3), 3);
    }

    #[test]
    fn test_running_mean() {
        let s = TimingSmoothing::RunningMean;
        let mut est = 0.0;
        for (n, sample) in [2.0, 4.0, 6.0].into_iter().enumerate() {
            est = s.apply(est, n as u64, sample);
        }
        assert!((est - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_ema_and_latest() {
        let ema = TimingSmoothing::Ema { alpha: 0.5 };
        assert!((ema.apply(10.0, 3, 20.0) - 15.0).abs() < 1e-9);
        assert_eq!(TimingSmoothing::Latest.apply(10.0, 3, 20.0), 20.0);
        // First sample always seeds the estimate
        assert_eq!(ema.apply(0.0, 0, 7.0), 7.0);
    }

    #[test]
    fn test_zero_interval_never_resamples() {
        let knobs: AutoTuneKnobs = toml::from_str("resample_interval_ms = 0").unwrap();
        assert_eq!(knobs.resample_interval_ms, Some(0));
        assert!(knobs.resample_interval().is_none());

        let knobs = AutoTuneKnobs::new().with_resample_interval(Duration::ZERO);
        assert!(knobs.resample_interval().is_none());
    }

    #[test]
    fn test_sub_millisecond_interval_rounds_up() {
        let knobs = AutoTuneKnobs::new().with_resample_interval(Duration::from_micros(500));
        assert_eq!(knobs.resample_interval_ms, Some(1));
        assert_eq!(knobs.resample_interval(), Some(Duration::from_millis(1)));

        let knobs = AutoTuneKnobs::new().with_resample_interval(Duration::from_micros(2_100));
        assert_eq!(knobs.resample_interval_ms, Some(3));
    }

    #[test]
    fn test_non_finite_alpha_uses_default() {
        for alpha in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let ema = TimingSmoothing::Ema { alpha };
            let expected = DEFAULT_EMA_ALPHA * 20.0 + (1.0 - DEFAULT_EMA_ALPHA) * 10.0;
            let got = ema.apply(10.0, 3, 20.0);
            assert!((got - expected).abs() < 1e-9, "alpha {alpha}: {got}");
        }
    }

    #[test]
    fn test_knobs_serde_round_trip() {
        let knobs = AutoTuneKnobs::new()
            .with_samples_per_resource(3)
            .with_smoothing(TimingSmoothing::Ema { alpha: 0.25 });
        let json = serde_json::to_string(&knobs).unwrap();
        let parsed: AutoTuneKnobs = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, knobs);
    }

    #[test]
    fn test_partial_toml() {
        let knobs: AutoTuneKnobs = toml::from_str(
            r#"
            resample_interval_ms = 500
            smoothing = { kind = "ema", alpha = 0.2 }
        "#,
        )
        .unwrap();
        assert_eq!(knobs.samples_per_resource, 1);
        assert_eq!(knobs.resample_interval_ms, Some(500));
        assert_eq!(knobs.smoothing, TimingSmoothing::Ema { alpha: 0.2 });
    }
}
