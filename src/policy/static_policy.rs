//! The static policy: every selection is the first resource.

use std::sync::Arc;

use super::{Policy, PolicyCore};
use crate::error::Result;
use crate::key::FunctionKey;
use crate::metrics::SelectionMetrics;
use crate::universe::{Init, Resource, Universe};

/// Always selects the first resource of the universe.
#[derive(Clone)]
pub struct StaticPolicy<R: Resource> {
    core: Arc<PolicyCore<R>>,
}

impl<R: Resource> StaticPolicy<R> {
    pub fn new(init: impl Into<Init<R>>) -> Self {
        Self::with_metrics(init, SelectionMetrics::new())
    }

    pub fn with_metrics(init: impl Into<Init<R>>, metrics: SelectionMetrics) -> Self {
        Self {
            core: Arc::new(PolicyCore::new(init.into(), metrics)),
        }
    }

    /// A policy bound to one explicitly supplied resource.
    pub fn from_resource(resource: R) -> Self {
        Self::new(vec![resource])
    }
}

impl<R: Resource> Policy for StaticPolicy<R> {
    type Resource = R;

    fn core(&self) -> &PolicyCore<R> {
        &self.core
    }

    fn choose(&self, _universe: &Universe<R>, _key: Option<FunctionKey>) -> Result<usize> {
        Ok(0)
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

impl<R: Resource> std::fmt::Debug for StaticPolicy<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticPolicy")
            .field("core", &self.core)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_first() {
        let policy = StaticPolicy::new(vec!["r0", "r1", "r2"]);
        for _ in 0..5 {
            assert_eq!(*policy.select_with(None).unwrap().resource(), "r0");
        }
    }

    #[test]
    fn test_from_resource() {
        let policy = StaticPolicy::from_resource(42u32);
        assert_eq!(policy.get_resources(), vec![42]);
        assert_eq!(policy.select_with(None).unwrap().into_resource(), 42);
    }

    #[test]
    fn test_key_is_ignored() {
        let policy = StaticPolicy::new(vec![1, 2]);
        let selection = policy.select_with(Some(FunctionKey(3))).unwrap();
        assert_eq!(selection.index(), 0);
    }
}
