//! Selection policies.
//!
//! A policy owns a [`PolicyCore`] (universe, submission group, metrics) and a
//! selection algorithm. Policies are cheap handles: clones share all state,
//! so a policy can be handed to many threads and every clone observes the
//! same round-robin cursor, timing table and outstanding submissions.
//!
//! | Policy | Selects |
//! |--------|---------|
//! | [`StaticPolicy`] | always the first resource |
//! | [`FixedResourcePolicy`] | the resource at a configured or explicit offset |
//! | [`RoundRobinPolicy`] | resources in turn, in call order |
//! | [`DynamicLoadPolicy`] | the resource with the fewest submissions in flight |
//! | [`AutoTunePolicy`] | per function key: each resource in turn, then the fastest |
//! | [`AnyPolicy`] | whichever of the above a configuration names |

mod any;
mod auto_tune;
mod dynamic_load;
mod fixed;
mod round_robin;
mod static_policy;

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::error::{BoxError, DsError, Result};
use crate::key::FunctionKey;
use crate::metrics::SelectionMetrics;
use crate::submission::{
    Feedback, GroupSnapshot, Placement, Submission, SubmissionGroup, Wait, WaitObject,
};
use crate::universe::{Init, Resource, Universe};

pub use any::AnyPolicy;
pub use auto_tune::{AutoTuneKnobs, AutoTunePolicy, TimingEstimate, TimingSmoothing};
pub use dynamic_load::DynamicLoadPolicy;
pub use fixed::FixedResourcePolicy;
pub use round_robin::RoundRobinPolicy;
pub use static_policy::StaticPolicy;

/// State every policy shares: the initialization state machine, the
/// submission group, and metrics.
pub struct PolicyCore<R> {
    universe: OnceLock<Universe<R>>,
    group: SubmissionGroup<R>,
    metrics: SelectionMetrics,
}

impl<R: Resource> PolicyCore<R> {
    pub fn new(init: Init<R>, metrics: SelectionMetrics) -> Self {
        let universe = match init {
            Init::Eager(universe) => OnceLock::from(universe),
            Init::Deferred => OnceLock::new(),
        };
        Self {
            universe,
            group: SubmissionGroup::new(metrics.clone()),
            metrics,
        }
    }

    /// Install the universe of a deferred policy.
    ///
    /// Fails with `AlreadyInitialized` if a universe is already present.
    pub fn initialize(&self, universe: Universe<R>, policy: &'static str) -> Result<()> {
        let len = universe.len();
        if self.universe.set(universe).is_err() {
            warn!(policy, "initialize called on an initialized policy");
            return Err(DsError::AlreadyInitialized);
        }
        debug!(policy, resources = len, "policy initialized");
        Ok(())
    }

    /// The universe, or `NotInitialized` for a deferred policy.
    pub fn universe(&self) -> Result<&Universe<R>> {
        self.universe.get().ok_or(DsError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.universe.get().is_some()
    }

    /// Resources in insertion order; empty before initialization.
    pub fn resources(&self) -> Vec<R> {
        self.universe.get().map(Universe::to_vec).unwrap_or_default()
    }

    pub fn group(&self) -> &SubmissionGroup<R> {
        &self.group
    }

    pub fn metrics(&self) -> &SelectionMetrics {
        &self.metrics
    }
}

impl<R: Resource> std::fmt::Debug for PolicyCore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyCore")
            .field("universe", &self.universe.get())
            .field("outstanding", &self.group.outstanding())
            .finish()
    }
}

/// A resource-selection strategy.
///
/// Implementors provide [`core`](Policy::core) and [`choose`](Policy::choose);
/// everything else in the selection protocol is built on those two.
pub trait Policy: Clone + Send + Sync + 'static {
    type Resource: Resource;

    fn core(&self) -> &PolicyCore<Self::Resource>;

    /// Pick a universe index. `universe` is initialized and non-empty.
    fn choose(
        &self,
        universe: &Universe<Self::Resource>,
        key: Option<FunctionKey>,
    ) -> Result<usize>;

    /// Sink for submission lifecycle events, for policies that learn from them.
    fn feedback(&self) -> Option<Arc<dyn Feedback>> {
        None
    }

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn initialize(&self, universe: impl Into<Universe<Self::Resource>>) -> Result<()> {
        self.core().initialize(universe.into(), self.name())
    }

    /// Select a resource, optionally on behalf of a function key.
    fn select_with(&self, key: Option<FunctionKey>) -> Result<Selection<Self>> {
        let universe = self.core().universe()?;
        if universe.is_empty() {
            return Err(DsError::EmptyUniverse);
        }
        let index = self.choose(universe, key)?;
        Selection::bind(self, universe, index, key)
    }

    fn get_resources(&self) -> Vec<Self::Resource> {
        self.core().resources()
    }

    fn get_submission_group(&self) -> GroupSnapshot<Self::Resource> {
        self.core().group().snapshot()
    }

    /// Wait on and reap every submission outstanding at the time of the call.
    fn wait_all(&self) -> Result<()> {
        self.get_submission_group().wait()
    }
}

macro_rules! impl_policy_wait {
    ($($policy:ident),* $(,)?) => {
        $(
            impl<R: Resource> Wait for $policy<R> {
                fn wait(&self) -> Result<()> {
                    self.wait_all()
                }
            }
        )*
    };
}

impl_policy_wait!(
    StaticPolicy,
    FixedResourcePolicy,
    RoundRobinPolicy,
    DynamicLoadPolicy,
    AutoTunePolicy,
    AnyPolicy,
);

/// A resource chosen by a policy, not yet used.
///
/// Submitting a selection runs work on exactly this resource; unwrapping it
/// yields the resource without side effects.
#[derive(Clone)]
pub struct Selection<P: Policy> {
    policy: P,
    resource: P::Resource,
    placement: Placement,
}

impl<P: Policy> Selection<P> {
    pub(crate) fn bind(
        policy: &P,
        universe: &Universe<P::Resource>,
        index: usize,
        key: Option<FunctionKey>,
    ) -> Result<Self> {
        let resource = universe.resource(index)?.clone();
        policy.core().metrics().selections.inc();
        trace!(policy = policy.name(), index, key = ?key, "resource selected");
        Ok(Self {
            policy: policy.clone(),
            resource,
            placement: Placement { index, key },
        })
    }

    pub fn resource(&self) -> &P::Resource {
        &self.resource
    }

    pub fn into_resource(self) -> P::Resource {
        self.resource
    }

    /// Universe index of the selected resource.
    pub fn index(&self) -> usize {
        self.placement.index
    }

    pub fn key(&self) -> Option<FunctionKey> {
        self.placement.key
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Run `f` with the selected resource and register the returned wait
    /// object.
    ///
    /// Nothing is registered if `f` returns an error or panics.
    pub fn try_submit<F, W, E>(self, f: F) -> Result<Submission<P::Resource>>
    where
        F: FnOnce(P::Resource) -> std::result::Result<W, E>,
        W: WaitObject,
        E: Into<BoxError>,
    {
        let started = Instant::now();
        let wait_object = match f(self.resource.clone()) {
            Ok(w) => w,
            Err(e) => {
                let err: BoxError = e.into();
                self.policy.core().metrics().submit_failures.inc();
                warn!(
                    policy = self.policy.name(),
                    index = self.placement.index,
                    error = %err,
                    "submitted callable failed"
                );
                return Err(DsError::Resource(err));
            }
        };
        Ok(self.policy.core().group().register(
            self.resource,
            self.placement,
            started,
            Box::new(wait_object),
            self.policy.feedback(),
        ))
    }

    /// Run `f` with the selected resource and register the returned wait object.
    pub fn submit<F, W>(self, f: F) -> Submission<P::Resource>
    where
        F: FnOnce(P::Resource) -> W,
        W: WaitObject,
    {
        let started = Instant::now();
        let wait_object = f(self.resource.clone());
        self.policy.core().group().register(
            self.resource,
            self.placement,
            started,
            Box::new(wait_object),
            self.policy.feedback(),
        )
    }
}

impl<P: Policy> std::fmt::Debug for Selection<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selection")
            .field("policy", &self.policy.name())
            .field("resource", &self.resource)
            .field("placement", &self.placement)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::universe::Deferred;

    #[test]
    fn test_core_eager() {
        let core = PolicyCore::new(Init::from(vec![1, 2, 3]), SelectionMetrics::new());
        assert!(core.is_initialized());
        assert_eq!(core.resources(), vec![1, 2, 3]);
        assert!(matches!(
            core.initialize(Universe::from(vec![4]), "test"),
            Err(DsError::AlreadyInitialized)
        ));
        assert_eq!(core.resources(), vec![1, 2, 3]);
    }

    #[test]
    fn test_core_deferred() {
        let core: PolicyCore<i32> = PolicyCore::new(Deferred.into(), SelectionMetrics::new());
        assert!(!core.is_initialized());
        assert!(core.resources().is_empty());
        assert!(matches!(core.universe(), Err(DsError::NotInitialized)));

        core.initialize(Universe::from(vec![7, 8]), "test").unwrap();
        assert_eq!(core.resources(), vec![7, 8]);
    }

    #[test]
    fn test_selection_accessors() {
        let policy = StaticPolicy::new(vec!["a", "b"]);
        let selection = policy.select_with(Some(FunctionKey(9))).unwrap();
        assert_eq!(*selection.resource(), "a");
        assert_eq!(selection.index(), 0);
        assert_eq!(selection.key(), Some(FunctionKey(9)));
        assert_eq!(policy.core().metrics().selections.get(), 1);
        assert_eq!(selection.into_resource(), "a");
    }

    #[test]
    fn test_try_submit_error_leaves_no_record() {
        let policy = RoundRobinPolicy::new(vec![0, 1]);
        let result = policy
            .select_with(None)
            .unwrap()
            .try_submit(|_| Err::<(), _>("queue full"));
        assert_eq!(result.unwrap_err().to_string(), "queue full");
        assert_eq!(policy.core().group().outstanding(), 0);
        assert_eq!(policy.core().metrics().submit_failures.get(), 1);
    }

    #[test]
    fn test_empty_universe_rejects_selection() {
        let policy = RoundRobinPolicy::new(Vec::<i32>::new());
        assert!(policy.get_resources().is_empty());
        assert!(matches!(policy.select_with(None), Err(DsError::EmptyUniverse)));
    }
}
