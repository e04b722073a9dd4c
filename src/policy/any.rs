//! Runtime choice among the built-in policies.

use std::sync::Arc;

use super::{
    AutoTunePolicy, DynamicLoadPolicy, FixedResourcePolicy, Policy, PolicyCore, RoundRobinPolicy,
    StaticPolicy,
};
use crate::config::{PolicyKind, SelectionConfig};
use crate::error::Result;
use crate::key::FunctionKey;
use crate::metrics::SelectionMetrics;
use crate::submission::Feedback;
use crate::universe::{Init, Resource, Universe};

/// One of the built-in policies, chosen at runtime.
///
/// This is what [`SelectionBuilder`](crate::SelectionBuilder) produces from a
/// configuration.
#[derive(Clone, Debug)]
pub enum AnyPolicy<R: Resource> {
    Static(StaticPolicy<R>),
    Fixed(FixedResourcePolicy<R>),
    RoundRobin(RoundRobinPolicy<R>),
    DynamicLoad(DynamicLoadPolicy<R>),
    AutoTune(AutoTunePolicy<R>),
}

macro_rules! dispatch {
    ($self:ident, $p:ident => $body:expr) => {
        match $self {
            AnyPolicy::Static($p) => $body,
            AnyPolicy::Fixed($p) => $body,
            AnyPolicy::RoundRobin($p) => $body,
            AnyPolicy::DynamicLoad($p) => $body,
            AnyPolicy::AutoTune($p) => $body,
        }
    };
}

impl<R: Resource> AnyPolicy<R> {
    /// Build the policy a configuration names.
    pub fn from_config(
        config: &SelectionConfig,
        init: impl Into<Init<R>>,
        metrics: SelectionMetrics,
    ) -> Result<Self> {
        let init = init.into();
        Ok(match config.policy {
            PolicyKind::Static => AnyPolicy::Static(StaticPolicy::with_metrics(init, metrics)),
            PolicyKind::Fixed => AnyPolicy::Fixed(FixedResourcePolicy::with_metrics(
                init,
                config.fixed_offset,
                metrics,
            )?),
            PolicyKind::RoundRobin => {
                AnyPolicy::RoundRobin(RoundRobinPolicy::with_metrics(init, metrics))
            }
            PolicyKind::DynamicLoad => {
                AnyPolicy::DynamicLoad(DynamicLoadPolicy::with_metrics(init, metrics))
            }
            PolicyKind::AutoTune => AnyPolicy::AutoTune(AutoTunePolicy::with_options(
                init,
                config.effective_auto_tune(),
                metrics,
            )),
        })
    }

    pub fn kind(&self) -> PolicyKind {
        match self {
            AnyPolicy::Static(_) => PolicyKind::Static,
            AnyPolicy::Fixed(_) => PolicyKind::Fixed,
            AnyPolicy::RoundRobin(_) => PolicyKind::RoundRobin,
            AnyPolicy::DynamicLoad(_) => PolicyKind::DynamicLoad,
            AnyPolicy::AutoTune(_) => PolicyKind::AutoTune,
        }
    }

    pub fn as_auto_tune(&self) -> Option<&AutoTunePolicy<R>> {
        match self {
            AnyPolicy::AutoTune(p) => Some(p),
            _ => None,
        }
    }
}

impl<R: Resource> Policy for AnyPolicy<R> {
    type Resource = R;

    fn core(&self) -> &PolicyCore<R> {
        dispatch!(self, p => p.core())
    }

    fn choose(&self, universe: &Universe<R>, key: Option<FunctionKey>) -> Result<usize> {
        dispatch!(self, p => p.choose(universe, key))
    }

    fn feedback(&self) -> Option<Arc<dyn Feedback>> {
        dispatch!(self, p => p.feedback())
    }

    fn name(&self) -> &'static str {
        dispatch!(self, p => p.name())
    }
}

impl<R: Resource> From<StaticPolicy<R>> for AnyPolicy<R> {
    fn from(p: StaticPolicy<R>) -> Self {
        AnyPolicy::Static(p)
    }
}

impl<R: Resource> From<FixedResourcePolicy<R>> for AnyPolicy<R> {
    fn from(p: FixedResourcePolicy<R>) -> Self {
        AnyPolicy::Fixed(p)
    }
}

impl<R: Resource> From<RoundRobinPolicy<R>> for AnyPolicy<R> {
    fn from(p: RoundRobinPolicy<R>) -> Self {
        AnyPolicy::RoundRobin(p)
    }
}

impl<R: Resource> From<DynamicLoadPolicy<R>> for AnyPolicy<R> {
    fn from(p: DynamicLoadPolicy<R>) -> Self {
        AnyPolicy::DynamicLoad(p)
    }
}

impl<R: Resource> From<AutoTunePolicy<R>> for AnyPolicy<R> {
    fn from(p: AutoTunePolicy<R>) -> Self {
        AnyPolicy::AutoTune(p)
    }
}
