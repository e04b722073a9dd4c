//! Round-robin selection: the k-th selection gets resource `(k - 1) % n`,
//! using one atomic cursor shared by every clone of the policy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{Policy, PolicyCore};
use crate::error::Result;
use crate::key::FunctionKey;
use crate::metrics::SelectionMetrics;
use crate::universe::{Init, Resource, Universe};

struct RoundRobinInner<R> {
    core: PolicyCore<R>,
    cursor: AtomicUsize,
}

/// Cycles through the universe in call order.
///
/// The k-th selection (counting from one) lands on `universe[(k - 1) % len]`.
/// The cursor is a single atomic counter, so concurrent callers each get a
/// distinct k and no k is skipped.
#[derive(Clone)]
pub struct RoundRobinPolicy<R: Resource> {
    inner: Arc<RoundRobinInner<R>>,
}

impl<R: Resource> RoundRobinPolicy<R> {
    pub fn new(init: impl Into<Init<R>>) -> Self {
        Self::with_metrics(init, SelectionMetrics::new())
    }

    pub fn with_metrics(init: impl Into<Init<R>>, metrics: SelectionMetrics) -> Self {
        Self {
            inner: Arc::new(RoundRobinInner {
                core: PolicyCore::new(init.into(), metrics),
                cursor: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of selections made so far.
    pub fn selections(&self) -> usize {
        self.inner.cursor.load(Ordering::Relaxed)
    }
}

impl<R: Resource> Policy for RoundRobinPolicy<R> {
    type Resource = R;

    fn core(&self) -> &PolicyCore<R> {
        &self.inner.core
    }

    fn choose(&self, universe: &Universe<R>, _key: Option<FunctionKey>) -> Result<usize> {
        let k = self.inner.cursor.fetch_add(1, Ordering::Relaxed);
        Ok(k % universe.len())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

impl<R: Resource> std::fmt::Debug for RoundRobinPolicy<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundRobinPolicy")
            .field("selections", &self.selections())
            .field("core", &self.inner.core)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DsError;
    use crate::universe::Deferred;

    #[test]
    fn test_cycles_in_order() {
        let policy = RoundRobinPolicy::new(vec![0, 1, 2]);
        let picked: Vec<i32> = (0..7)
            .map(|_| policy.select_with(None).unwrap().into_resource())
            .collect();
        assert_eq!(picked, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(policy.selections(), 7);
    }

    #[test]
    fn test_single_resource_degenerates_to_static() {
        let policy = RoundRobinPolicy::new(vec!["only"]);
        for _ in 0..4 {
            assert_eq!(policy.select_with(None).unwrap().index(), 0);
        }
    }

    #[test]
    fn test_clones_share_cursor() {
        let policy = RoundRobinPolicy::new(vec![0, 1]);
        let other = policy.clone();
        assert_eq!(policy.select_with(None).unwrap().index(), 0);
        assert_eq!(other.select_with(None).unwrap().index(), 1);
    }

    #[test]
    fn test_failed_selection_does_not_advance() {
        let policy = RoundRobinPolicy::<i32>::new(Deferred);
        assert!(matches!(
            policy.select_with(None),
            Err(DsError::NotInitialized)
        ));
        policy.initialize(vec![5, 6]).unwrap();
        assert_eq!(policy.select_with(None).unwrap().into_resource(), 5);
    }
}
