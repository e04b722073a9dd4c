//! Per-function-key tuning state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use super::knobs::{AutoTuneKnobs, TimingSmoothing};
use crate::key::FunctionKey;
use crate::metrics::SelectionMetrics;
use crate::submission::{Feedback, Placement};

/// Running timing estimate for one (function key, resource) pair.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimingEstimate {
    /// Samples folded into the estimate.
    pub samples: u64,
    mean_secs: f64,
}

impl TimingEstimate {
    /// The estimated execution time, or `None` before the first sample.
    pub fn mean(&self) -> Option<Duration> {
        (self.samples > 0 && self.mean_secs.is_finite())
            .then(|| Duration::from_secs_f64(self.mean_secs))
    }

    fn record(&mut self, sample: Duration, smoothing: TimingSmoothing) {
        self.mean_secs = smoothing.apply(self.mean_secs, self.samples, sample.as_secs_f64());
        self.samples += 1;
    }
}

#[derive(Debug)]
struct TunerState {
    /// Warm-up selections made in the current profiling pass.
    next: usize,
    warmed_up: bool,
    /// When the key last finished warming up.
    exploiting_since: Instant,
    estimates: Vec<TimingEstimate>,
}

impl TunerState {
    /// Lowest estimate among the first `resources` entries; lowest index
    /// wins ties, and index 0 is used while nothing has been measured.
    fn best(&self, resources: usize) -> usize {
        let mut best: Option<(usize, f64)> = None;
        for (index, estimate) in self.estimates.iter().take(resources).enumerate() {
            if estimate.samples == 0 || !estimate.mean_secs.is_finite() {
                continue;
            }
            match best {
                Some((_, mean)) if mean <= estimate.mean_secs => {}
                _ => best = Some((index, estimate.mean_secs)),
            }
        }
        best.map_or(0, |(index, _)| index)
    }
}

/// Tuning state for one function key.
#[derive(Debug)]
pub(crate) struct Tuner {
    state: Mutex<TunerState>,
}

impl Tuner {
    fn new() -> Self {
        Self {
            state: Mutex::new(TunerState {
                next: 0,
                warmed_up: false,
                exploiting_since: Instant::now(),
                estimates: Vec::new(),
            }),
        }
    }
}

/// Tuners for every function key seen by one auto-tune policy.
pub(crate) struct TunerTable {
    tuners: Mutex<HashMap<FunctionKey, Arc<Tuner>>>,
    knobs: AutoTuneKnobs,
    metrics: SelectionMetrics,
}

impl TunerTable {
    pub(crate) fn new(knobs: AutoTuneKnobs, metrics: SelectionMetrics) -> Self {
        Self {
            tuners: Mutex::new(HashMap::new()),
            knobs,
            metrics,
        }
    }

    pub(crate) fn knobs(&self) -> &AutoTuneKnobs {
        &self.knobs
    }

    fn tuner(&self, key: FunctionKey) -> Arc<Tuner> {
        self.tuners
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(Tuner::new()))
            .clone()
    }

    fn existing(&self, key: FunctionKey) -> Option<Arc<Tuner>> {
        self.tuners.lock().get(&key).cloned()
    }

    /// Run the warm-up / exploit state machine for `key` over `resources`.
    pub(crate) fn choose(&self, key: FunctionKey, resources: usize) -> usize {
        let tuner = self.tuner(key);
        let mut state = tuner.state.lock();

        if state.warmed_up {
            if let Some(interval) = self.knobs.resample_interval() {
                if state.exploiting_since.elapsed() >= interval {
                    state.next = 0;
                    state.warmed_up = false;
                    self.metrics.resamples.inc();
                    debug!(key = %key, "resampling function key");
                }
            }
        }

        let warmup_len = self.knobs.warmup_len(resources);
        if state.next < warmup_len {
            let index = state.next % resources;
            state.next += 1;
            if state.next == warmup_len {
                state.warmed_up = true;
                state.exploiting_since = Instant::now();
                debug!(key = %key, resources, "warm-up complete");
            }
            self.metrics.record_tuning(true);
            return index;
        }

        self.metrics.record_tuning(false);
        state.best(resources)
    }

    /// Fold one timing sample into the estimate for (`key`, `index`).
    pub(crate) fn record(&self, key: FunctionKey, index: usize, elapsed: Duration) {
        let tuner = self.tuner(key);
        let mut state = tuner.state.lock();
        if state.estimates.len() <= index {
            state.estimates.resize(index + 1, TimingEstimate::default());
        }
        state.estimates[index].record(elapsed, self.knobs.smoothing);
        self.metrics.timing_samples.inc();
    }

    pub(crate) fn estimates(&self, key: FunctionKey) -> Option<Vec<TimingEstimate>> {
        self.existing(key).map(|t| t.state.lock().estimates.clone())
    }

    pub(crate) fn is_warmed_up(&self, key: FunctionKey) -> bool {
        self.existing(key)
            .map_or(false, |t| t.state.lock().warmed_up)
    }

    pub(crate) fn keys(&self) -> usize {
        self.tuners.lock().len()
    }
}

impl Feedback for TunerTable {
    fn completed(&self, placement: &Placement, elapsed: Option<Duration>) {
        if let (Some(key), Some(elapsed)) = (placement.key, elapsed) {
            self.record(key, placement.index, elapsed);
        }
    }
}
