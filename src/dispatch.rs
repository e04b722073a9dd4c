//! The free-function selection protocol.
//!
//! These functions accept any [`Policy`] (or a [`Selection`] made by one)
//! and are re-exported at the crate root:
//!
//! ```ignore
//! let selection = dynsel::select(&policy)?;
//! let queue = dynsel::unwrap(&selection);
//!
//! let submission = dynsel::submit(selection, |q| q.submit(work))?;
//! dynsel::wait(&submission)?;
//!
//! dynsel::submit_and_wait(&policy, |q| q.submit(more_work))?;
//! dynsel::wait(&dynsel::get_submission_group(&policy))?;
//! ```

use std::convert::Infallible;

use crate::error::{BoxError, Result};
use crate::key::FunctionKey;
use crate::policy::{Policy, Selection};
use crate::submission::{GroupSnapshot, Submission, Wait, WaitObject};
use crate::universe::Universe;

/// Something work can be submitted through: a policy, a policy paired with
/// a function key, or a selection.
pub trait Submit {
    type Policy: Policy;

    /// Resolve to the resource the work will run on.
    fn into_selection(self) -> Result<Selection<Self::Policy>>;
}

impl<P: Policy> Submit for &P {
    type Policy = P;

    fn into_selection(self) -> Result<Selection<P>> {
        self.select_with(None)
    }
}

impl<P: Policy> Submit for Selection<P> {
    type Policy = P;

    fn into_selection(self) -> Result<Selection<P>> {
        Ok(self)
    }
}

/// A policy borrowed together with the function key to select for.
///
/// Created by [`with_key`].
#[derive(Debug)]
pub struct Keyed<'a, P> {
    policy: &'a P,
    key: FunctionKey,
}

impl<P> Clone for Keyed<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for Keyed<'_, P> {}

impl<'a, P: Policy> Submit for Keyed<'a, P> {
    type Policy = P;

    fn into_selection(self) -> Result<Selection<P>> {
        self.policy.select_with(Some(self.key))
    }
}

type ResourceOf<S> = <<S as Submit>::Policy as Policy>::Resource;

/// Select a resource without submitting anything.
pub fn select<P: Policy>(policy: &P) -> Result<Selection<P>> {
    policy.select_with(None)
}

/// Select a resource on behalf of a function key.
pub fn select_for<P: Policy>(policy: &P, key: FunctionKey) -> Result<Selection<P>> {
    policy.select_with(Some(key))
}

/// Pair a policy with a function key for [`submit`].
pub fn with_key<P: Policy>(policy: &P, key: FunctionKey) -> Keyed<'_, P> {
    Keyed { policy, key }
}

/// Run `f` on a selected resource and register the wait object it returns.
///
/// Returning `()` from `f` means there is nothing to wait for; the
/// submission is then trivially complete.
pub fn submit<S, F, W>(target: S, f: F) -> Result<Submission<ResourceOf<S>>>
where
    S: Submit,
    F: FnOnce(ResourceOf<S>) -> W,
    W: WaitObject,
{
    Ok(target.into_selection()?.submit(f))
}

/// Like [`submit`], for callables that can fail to dispatch their work.
///
/// An error from `f` is returned as `DsError::Resource` and nothing is
/// registered.
pub fn try_submit<S, F, W, E>(target: S, f: F) -> Result<Submission<ResourceOf<S>>>
where
    S: Submit,
    F: FnOnce(ResourceOf<S>) -> std::result::Result<W, E>,
    W: WaitObject,
    E: Into<BoxError>,
{
    target.into_selection()?.try_submit(f)
}

/// Submit and block until that one submission is complete.
pub fn submit_and_wait<S, F, W>(target: S, f: F) -> Result<()>
where
    S: Submit,
    F: FnOnce(ResourceOf<S>) -> W,
    W: WaitObject,
{
    try_submit_and_wait(target, |r| Ok::<_, Infallible>(f(r)))
}

/// Fallible form of [`submit_and_wait`].
pub fn try_submit_and_wait<S, F, W, E>(target: S, f: F) -> Result<()>
where
    S: Submit,
    F: FnOnce(ResourceOf<S>) -> std::result::Result<W, E>,
    W: WaitObject,
    E: Into<BoxError>,
{
    try_submit(target, f)?.wait()
}

/// Block on a submission, a group snapshot, or every outstanding submission
/// of a policy.
pub fn wait<T: Wait + ?Sized>(target: &T) -> Result<()> {
    target.wait()
}

/// The resource a selection is bound to.
pub fn unwrap<P: Policy>(selection: &Selection<P>) -> P::Resource {
    selection.resource().clone()
}

/// The policy's universe in insertion order; empty before initialization.
pub fn get_resources<P: Policy>(policy: &P) -> Vec<P::Resource> {
    policy.get_resources()
}

/// Snapshot of the submissions outstanding right now.
pub fn get_submission_group<P: Policy>(policy: &P) -> GroupSnapshot<P::Resource> {
    policy.get_submission_group()
}

/// Give a deferred policy its universe.
pub fn initialize<P: Policy>(policy: &P, universe: impl Into<Universe<P::Resource>>) -> Result<()> {
    policy.initialize(universe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DsError;
    use crate::policy::{AutoTunePolicy, RoundRobinPolicy, StaticPolicy};
    use crate::submission::Completed;

    #[test]
    fn test_submit_through_policy_and_selection() {
        let policy = RoundRobinPolicy::new(vec![0, 1]);
        let first = submit(&policy, |r| {
            assert_eq!(r, 0);
        })
        .unwrap();
        let selection = select(&policy).unwrap();
        assert_eq!(unwrap(&selection), 1);
        let second = submit(selection, |_| Completed).unwrap();

        assert_eq!(first.index(), 0);
        assert_eq!(second.index(), 1);
        wait(&policy).unwrap();
        assert!(get_submission_group(&policy).is_empty());
    }

    #[test]
    fn test_keyed_submit() {
        let policy = AutoTunePolicy::new(vec!["a", "b"]);
        let key = FunctionKey(5);
        assert!(matches!(
            submit(&policy, |_| ()),
            Err(DsError::MissingFunctionKey)
        ));
        let sub = submit(with_key(&policy, key), |_| ()).unwrap();
        assert_eq!(sub.placement().key, Some(key));
        assert_eq!(select_for(&policy, key).unwrap().index(), 1);
    }

    #[test]
    fn test_try_submit_and_wait_propagates() {
        let policy = StaticPolicy::new(vec![1]);
        let err = try_submit_and_wait(&policy, |_| Err::<(), _>("rejected")).unwrap_err();
        assert_eq!(err.to_string(), "rejected");
        assert!(policy.core().group().is_empty());

        submit_and_wait(&policy, |_| ()).unwrap();
        assert!(policy.core().group().is_empty());
    }

    #[test]
    fn test_wait_on_submission_twice() {
        let policy = StaticPolicy::new(vec![1]);
        let sub = submit(&policy, |_| Completed).unwrap();
        wait(&sub).unwrap();
        assert!(matches!(wait(&sub), Err(DsError::DoubleWait(_))));
    }
}
