//! Auto-tuning policy: profile every resource per function key, then keep
//! using the fastest.
//!
//! Selection is keyed: every call must name the [`FunctionKey`] of the
//! workload it is for. Each key goes through its own warm-up, in which
//! selections walk the universe in call order, and then exploits the
//! resource with the lowest timing estimate.
//!
//! Timing samples come from completed submissions. Work that finishes inside
//! the callable (a [`Completed`](crate::Completed) wait object) is measured at
//! submit; asynchronous work is measured when its submission is waited on,
//! individually or through the submission group. Untimed results such as `()`
//! never produce a sample.
//!
//! # Example
//!
//! ```ignore
//! use dynsel::{AutoTunePolicy, FunctionKey};
//!
//! let policy = AutoTunePolicy::new(queues);
//! let key = FunctionKey::from_name("blur");
//!
//! for frame in frames {
//!     dynsel::submit(dynsel::with_key(&policy, key), |q| q.submit(move || blur(frame)))?;
//! }
//! dynsel::wait(&policy)?;
//! ```

mod knobs;
mod tuner;

use std::sync::Arc;
use std::time::Duration;

pub use knobs::{AutoTuneKnobs, TimingSmoothing};
pub use tuner::TimingEstimate;

use super::{Policy, PolicyCore};
use crate::error::{DsError, Result};
use crate::key::FunctionKey;
use crate::metrics::SelectionMetrics;
use crate::submission::Feedback;
use crate::universe::{Init, Resource, Universe};
use tuner::TunerTable;

struct AutoTuneInner<R> {
    core: PolicyCore<R>,
    tuners: Arc<TunerTable>,
}

/// Selects the historically fastest resource for each function key.
#[derive(Clone)]
pub struct AutoTunePolicy<R: Resource> {
    inner: Arc<AutoTuneInner<R>>,
}

impl<R: Resource> AutoTunePolicy<R> {
    pub fn new(init: impl Into<Init<R>>) -> Self {
        Self::with_options(init, AutoTuneKnobs::default(), SelectionMetrics::new())
    }

    pub fn with_knobs(init: impl Into<Init<R>>, knobs: AutoTuneKnobs) -> Self {
        Self::with_options(init, knobs, SelectionMetrics::new())
    }

    pub fn with_options(
        init: impl Into<Init<R>>,
        knobs: AutoTuneKnobs,
        metrics: SelectionMetrics,
    ) -> Self {
        Self {
            inner: Arc::new(AutoTuneInner {
                tuners: Arc::new(TunerTable::new(knobs, metrics.clone())),
                core: PolicyCore::new(init.into(), metrics),
            }),
        }
    }

    pub fn knobs(&self) -> &AutoTuneKnobs {
        self.inner.tuners.knobs()
    }

    /// Feed a timing sample measured outside the submission protocol.
    pub fn report_timing(&self, key: FunctionKey, index: usize, elapsed: Duration) -> Result<()> {
        self.inner.core.universe()?.resource(index)?;
        self.inner.tuners.record(key, index, elapsed);
        Ok(())
    }

    /// Timing estimates for `key`, indexed like the universe.
    ///
    /// `None` if the key has never been selected or timed. Resources that
    /// have not been measured yet have an estimate with zero samples, or are
    /// missing from the end of the list.
    pub fn estimates(&self, key: FunctionKey) -> Option<Vec<TimingEstimate>> {
        self.inner.tuners.estimates(key)
    }

    /// Whether `key` has finished its current warm-up.
    pub fn is_warmed_up(&self, key: FunctionKey) -> bool {
        self.inner.tuners.is_warmed_up(key)
    }

    /// Number of function keys with tuning state.
    pub fn tracked_keys(&self) -> usize {
        self.inner.tuners.keys()
    }
}

impl<R: Resource> Policy for AutoTunePolicy<R> {
    type Resource = R;

    fn core(&self) -> &PolicyCore<R> {
        &self.inner.core
    }

    fn choose(&self, universe: &Universe<R>, key: Option<FunctionKey>) -> Result<usize> {
        let key = key.ok_or(DsError::MissingFunctionKey)?;
        Ok(self.inner.tuners.choose(key, universe.len()))
    }

    fn feedback(&self) -> Option<Arc<dyn Feedback>> {
        Some(self.inner.tuners.clone())
    }

    fn name(&self) -> &'static str {
        "auto_tune"
    }
}

impl<R: Resource> std::fmt::Debug for AutoTunePolicy<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoTunePolicy")
            .field("knobs", self.knobs())
            .field("tracked_keys", &self.tracked_keys())
            .field("core", &self.inner.core)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::Completed;
    use crate::universe::Deferred;

    #[test]
    fn test_requires_key() {
        let policy = AutoTunePolicy::new(vec![0, 1]);
        assert!(matches!(
            policy.select_with(None),
            Err(DsError::MissingFunctionKey)
        ));
        // A failed keyless call does not disturb keyed state
        assert_eq!(policy.tracked_keys(), 0);
    }

    #[test]
    fn test_not_initialized_before_key_check() {
        let policy = AutoTunePolicy::<i32>::new(Deferred);
        assert!(matches!(
            policy.select_with(None),
            Err(DsError::NotInitialized)
        ));
    }

    #[test]
    fn test_reported_timings_steer_selection() {
        let policy = AutoTunePolicy::new(vec!["cpu", "gpu", "fpga"]);
        let key = FunctionKey::from_name("fft");
        for expected in ["cpu", "gpu", "fpga"] {
            assert_eq!(*policy.select_with(Some(key)).unwrap().resource(), expected);
        }
        policy.report_timing(key, 0, Duration::from_millis(9)).unwrap();
        policy.report_timing(key, 1, Duration::from_millis(2)).unwrap();
        policy.report_timing(key, 2, Duration::from_millis(5)).unwrap();

        assert!(policy.is_warmed_up(key));
        assert_eq!(*policy.select_with(Some(key)).unwrap().resource(), "gpu");
    }

    #[test]
    fn test_report_timing_checks_index() {
        let policy = AutoTunePolicy::new(vec![1, 2]);
        assert!(matches!(
            policy.report_timing(FunctionKey(1), 2, Duration::from_millis(1)),
            Err(DsError::InvalidResourceIndex { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_inline_submissions_feed_estimates() {
        let policy = AutoTunePolicy::new(vec![0u64, 6]);
        let key = FunctionKey(11);
        for _ in 0..2 {
            policy
                .select_with(Some(key))
                .unwrap()
                .submit(|delay_ms| {
                    std::thread::sleep(Duration::from_millis(delay_ms));
                    Completed
                })
                .wait()
                .unwrap();
        }
        let estimates = policy.estimates(key).unwrap();
        assert_eq!(estimates[0].samples, 1);
        assert_eq!(estimates[1].samples, 1);
        assert!(estimates[1].mean().unwrap() >= Duration::from_millis(6));
        assert_eq!(policy.select_with(Some(key)).unwrap().index(), 0);
    }

    #[test]
    fn test_untimed_submissions_leave_no_samples() {
        let policy = AutoTunePolicy::new(vec![0, 1]);
        let key = FunctionKey(12);
        for _ in 0..2 {
            policy.select_with(Some(key)).unwrap().submit(|_| ());
        }
        policy.wait_all().unwrap();
        let estimates = policy.estimates(key).unwrap_or_default();
        assert!(estimates.iter().all(|e| e.samples == 0));
    }
}
