//! Least-loaded selection.
//!
//! Each resource carries a count of submissions registered and not yet
//! completed; selection goes to the smallest count.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::{Policy, PolicyCore};
use crate::error::Result;
use crate::key::FunctionKey;
use crate::metrics::SelectionMetrics;
use crate::submission::{Feedback, Placement};
use crate::universe::{Init, Resource, Universe};

/// In-flight submission count per resource.
///
/// Sized on first selection, once the universe is known.
#[derive(Default)]
struct LoadTable {
    slots: OnceLock<Box<[AtomicUsize]>>,
}

impl LoadTable {
    fn slots(&self, len: usize) -> &[AtomicUsize] {
        self.slots
            .get_or_init(|| (0..len).map(|_| AtomicUsize::new(0)).collect())
    }

    fn snapshot(&self) -> Vec<usize> {
        self.slots
            .get()
            .map(|slots| slots.iter().map(|s| s.load(Ordering::Acquire)).collect())
            .unwrap_or_default()
    }
}

impl Feedback for LoadTable {
    fn submitted(&self, placement: &Placement) {
        if let Some(slot) = self.slots.get().and_then(|s| s.get(placement.index)) {
            slot.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn completed(&self, placement: &Placement, _elapsed: Option<Duration>) {
        if let Some(slot) = self.slots.get().and_then(|s| s.get(placement.index)) {
            // Each submission is counted once and released once
            let _ = slot.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        }
    }
}

struct DynamicLoadInner<R> {
    core: PolicyCore<R>,
    load: Arc<LoadTable>,
}

/// Selects the resource with the fewest submissions in flight.
///
/// A submission counts against its resource from registration until it
/// completes. Ties go to the lowest index.
#[derive(Clone)]
pub struct DynamicLoadPolicy<R: Resource> {
    inner: Arc<DynamicLoadInner<R>>,
}

impl<R: Resource> DynamicLoadPolicy<R> {
    pub fn new(init: impl Into<Init<R>>) -> Self {
        Self::with_metrics(init, SelectionMetrics::new())
    }

    pub fn with_metrics(init: impl Into<Init<R>>, metrics: SelectionMetrics) -> Self {
        Self {
            inner: Arc::new(DynamicLoadInner {
                core: PolicyCore::new(init.into(), metrics),
                load: Arc::new(LoadTable::default()),
            }),
        }
    }

    /// Current in-flight count per resource; empty before the first selection.
    pub fn loads(&self) -> Vec<usize> {
        self.inner.load.snapshot()
    }
}

impl<R: Resource> Policy for DynamicLoadPolicy<R> {
    type Resource = R;

    fn core(&self) -> &PolicyCore<R> {
        &self.inner.core
    }

    fn choose(&self, universe: &Universe<R>, _key: Option<FunctionKey>) -> Result<usize> {
        let slots = self.inner.load.slots(universe.len());
        let index = slots
            .iter()
            .enumerate()
            .min_by_key(|(_, load)| load.load(Ordering::Acquire))
            .map_or(0, |(index, _)| index);
        Ok(index)
    }

    fn feedback(&self) -> Option<Arc<dyn Feedback>> {
        Some(self.inner.load.clone())
    }

    fn name(&self) -> &'static str {
        "dynamic_load"
    }
}

impl<R: Resource> std::fmt::Debug for DynamicLoadPolicy<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicLoadPolicy")
            .field("loads", &self.loads())
            .field("core", &self.inner.core)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::submission::WaitObject;
    use parking_lot::{Condvar, Mutex};

    struct Gate(Arc<(Mutex<bool>, Condvar)>);

    impl WaitObject for Gate {
        fn wait(&mut self) -> std::result::Result<(), BoxError> {
            let mut open = self.0 .0.lock();
            while !*open {
                self.0 .1.wait(&mut open);
            }
            Ok(())
        }
    }

    fn gate() -> (Gate, Arc<(Mutex<bool>, Condvar)>) {
        let shared = Arc::new((Mutex::new(false), Condvar::new()));
        (Gate(shared.clone()), shared)
    }

    #[test]
    fn test_idle_policy_prefers_first() {
        let policy = DynamicLoadPolicy::new(vec![0, 1, 2]);
        assert_eq!(policy.select_with(None).unwrap().index(), 0);
        assert_eq!(policy.select_with(None).unwrap().index(), 0);
        assert_eq!(policy.loads(), vec![0, 0, 0]);
    }

    #[test]
    fn test_busy_resources_are_avoided() {
        let policy = DynamicLoadPolicy::new(vec![0, 1, 2]);
        let (first, first_gate) = gate();
        let (second, second_gate) = gate();

        let a = policy.select_with(None).unwrap().submit(|_| first);
        assert_eq!(a.index(), 0);
        let b = policy.select_with(None).unwrap().submit(|_| second);
        assert_eq!(b.index(), 1);
        assert_eq!(policy.loads(), vec![1, 1, 0]);
        assert_eq!(policy.select_with(None).unwrap().index(), 2);

        *first_gate.0.lock() = true;
        first_gate.1.notify_all();
        a.wait().unwrap();
        assert_eq!(policy.loads(), vec![0, 1, 0]);
        assert_eq!(policy.select_with(None).unwrap().index(), 0);

        *second_gate.0.lock() = true;
        second_gate.1.notify_all();
        b.wait().unwrap();
        assert_eq!(policy.loads(), vec![0, 0, 0]);
    }

    struct Crashing;

    impl WaitObject for Crashing {
        fn wait(&mut self) -> std::result::Result<(), BoxError> {
            panic!("event wait crashed")
        }
    }

    #[test]
    fn test_panicking_wait_releases_load() {
        let policy = DynamicLoadPolicy::new(vec!["a", "b"]);
        let sub = policy.select_with(None).unwrap().submit(|_| Crashing);
        assert_eq!(policy.loads(), vec![1, 0]);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sub.wait()));
        assert!(result.is_err());
        assert_eq!(policy.loads(), vec![0, 0]);
        assert!(policy.core().group().is_empty());
        policy.wait_all().unwrap();
        assert_eq!(policy.select_with(None).unwrap().index(), 0);
    }

    #[test]
    fn test_inline_work_holds_no_load() {
        let policy = DynamicLoadPolicy::new(vec!["a", "b"]);
        let sub = policy.select_with(None).unwrap().submit(|_| ());
        assert_eq!(policy.loads(), vec![0, 0]);
        sub.wait().unwrap();
        assert_eq!(policy.loads(), vec![0, 0]);
    }
}
