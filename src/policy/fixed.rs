//! Selection of a resource at a configured offset into the universe.

use std::sync::Arc;

use super::{Policy, PolicyCore, Selection};
use crate::error::{DsError, Result};
use crate::key::FunctionKey;
use crate::metrics::SelectionMetrics;
use crate::universe::{Init, Resource, Universe};

struct FixedInner<R> {
    core: PolicyCore<R>,
    offset: usize,
}

/// Selects the resource at an explicit offset into the universe.
///
/// The offset given at construction is used by plain `select`/`submit`;
/// [`select_offset`](FixedResourcePolicy::select_offset) picks a different
/// offset for a single call.
#[derive(Clone)]
pub struct FixedResourcePolicy<R: Resource> {
    inner: Arc<FixedInner<R>>,
}

impl<R: Resource> FixedResourcePolicy<R> {
    /// Create a policy that selects `offset`.
    ///
    /// For an eagerly initialized, non-empty universe the offset is checked
    /// right away; otherwise it is checked on every selection.
    pub fn new(init: impl Into<Init<R>>, offset: usize) -> Result<Self> {
        Self::with_metrics(init, offset, SelectionMetrics::new())
    }

    pub fn with_metrics(
        init: impl Into<Init<R>>,
        offset: usize,
        metrics: SelectionMetrics,
    ) -> Result<Self> {
        let core = PolicyCore::new(init.into(), metrics);
        if let Ok(universe) = core.universe() {
            if !universe.is_empty() {
                universe.resource(offset)?;
            }
        }
        Ok(Self {
            inner: Arc::new(FixedInner { core, offset }),
        })
    }

    /// The offset used when none is given.
    pub fn offset(&self) -> usize {
        self.inner.offset
    }

    /// Select the resource at `offset` for this call only.
    pub fn select_offset(&self, offset: usize) -> Result<Selection<Self>> {
        let universe = self.inner.core.universe()?;
        if universe.is_empty() {
            return Err(DsError::EmptyUniverse);
        }
        Selection::bind(self, universe, offset, None)
    }
}

impl<R: Resource> Policy for FixedResourcePolicy<R> {
    type Resource = R;

    fn core(&self) -> &PolicyCore<R> {
        &self.inner.core
    }

    fn choose(&self, universe: &Universe<R>, _key: Option<FunctionKey>) -> Result<usize> {
        universe.resource(self.inner.offset)?;
        Ok(self.inner.offset)
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

impl<R: Resource> std::fmt::Debug for FixedResourcePolicy<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedResourcePolicy")
            .field("offset", &self.inner.offset)
            .field("core", &self.inner.core)
            .finish()
    }
}
