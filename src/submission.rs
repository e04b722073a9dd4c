//! Submission records, the submission group, and the wait protocol.
//!
//! Every successful `submit` registers one [`SubmissionRecord`] in the
//! policy's [`SubmissionGroup`]. A record is reaped exactly once: either by
//! waiting on its [`Submission`] handle or by waiting on a [`GroupSnapshot`]
//! that contains it. Reaping blocks on the wait object returned by the
//! callable, delivers completion feedback to the policy, and removes the
//! record from the group.
//!
//! # Completion feedback
//!
//! Each record reports completion to its policy exactly once. Wait objects
//! that are already complete when the callable returns (inline execution)
//! report at registration; all others report when they are reaped. Timing is
//! the wall time from just before the callable was invoked until completion
//! was observed, and is only reported for timed wait objects that finished
//! without error.
//!
//! # Group waits
//!
//! A [`GroupSnapshot`] contains exactly the records outstanding when it was
//! taken. Records submitted while a group wait is in progress are not waited
//! on. When another thread has already claimed a record in the snapshot, the
//! group wait blocks until that thread finishes reaping it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{trace, warn};

use crate::error::{BoxError, DsError, Result};
use crate::key::FunctionKey;
use crate::metrics::SelectionMetrics;
use crate::universe::Resource;

/// Completion handle returned by a submitted callable.
///
/// Implement this for whatever a resource hands back after accepting work
/// (an event, a future's blocking adapter, a join handle wrapper).
pub trait WaitObject: Send + 'static {
    /// Block until the work is complete.
    ///
    /// Called at most once per submission by the selection runtime.
    fn wait(&mut self) -> std::result::Result<(), BoxError>;

    /// Non-blocking probe. Objects that report `true` right after the
    /// callable returns have their completion recorded immediately.
    fn is_complete(&self) -> bool {
        false
    }

    /// Whether this object stands for real work whose duration should feed
    /// timing-driven policies.
    fn is_timed(&self) -> bool {
        true
    }
}

/// The "no event" result: trivially complete, never timed.
impl WaitObject for () {
    fn wait(&mut self) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    fn is_complete(&self) -> bool {
        true
    }

    fn is_timed(&self) -> bool {
        false
    }
}

/// `None` behaves like `()`; `Some` delegates.
impl<W: WaitObject> WaitObject for Option<W> {
    fn wait(&mut self) -> std::result::Result<(), BoxError> {
        match self {
            Some(inner) => inner.wait(),
            None => Ok(()),
        }
    }

    fn is_complete(&self) -> bool {
        self.as_ref().map_or(true, |inner| inner.is_complete())
    }

    fn is_timed(&self) -> bool {
        self.as_ref().map_or(false, |inner| inner.is_timed())
    }
}

/// Wait object for work that already ran to completion inside the callable.
///
/// Unlike `()`, the time spent in the callable is reported as a timing sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Completed;

impl WaitObject for Completed {
    fn wait(&mut self) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    fn is_complete(&self) -> bool {
        true
    }
}

/// Where a unit of work was placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Placement {
    /// Universe index of the chosen resource.
    pub index: usize,
    /// Function key the selection was made for, if any.
    pub key: Option<FunctionKey>,
}

/// Receives the lifecycle of submissions from the submission group.
///
/// Implemented by policies whose selection depends on what happened to
/// earlier work.
pub trait Feedback: Send + Sync {
    /// A submission was registered at `placement`.
    fn submitted(&self, _placement: &Placement) {}

    /// A submission at `placement` completed. `elapsed` is `None` for untimed
    /// work and for work whose wait failed. Called exactly once per submission.
    fn completed(&self, placement: &Placement, elapsed: Option<Duration>);
}

/// Bookkeeping for one in-flight unit of work.
pub struct SubmissionRecord<R> {
    id: u64,
    resource: R,
    placement: Placement,
    started: Instant,
    timed: bool,
    wait_object: Mutex<Option<Box<dyn WaitObject>>>,
    reaped: AtomicBool,
    reported: AtomicBool,
    done: Mutex<bool>,
    done_cv: Condvar,
    feedback: Option<Arc<dyn Feedback>>,
}

impl<R: Resource> SubmissionRecord<R> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    /// Whether some waiter has claimed this record.
    pub fn is_reaped(&self) -> bool {
        self.reaped.load(Ordering::Acquire)
    }

    /// Claim the right to reap. Only one caller ever gets `true`.
    fn claim(&self) -> bool {
        !self.reaped.swap(true, Ordering::AcqRel)
    }

    /// Deliver completion feedback once.
    fn report(&self, elapsed: Option<Duration>) {
        if self.reported.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(feedback) = &self.feedback {
            feedback.completed(&self.placement, elapsed);
        }
    }

    /// Report right away if the wait object finished inside the callable.
    fn report_if_complete(&self) {
        let complete = self
            .wait_object
            .lock()
            .as_ref()
            .map_or(true, |w| w.is_complete());
        if complete {
            let elapsed = self.timed.then(|| self.started.elapsed());
            self.report(elapsed);
        }
    }

    /// Block on the wait object and report completion. Caller must hold the claim.
    fn complete(&self) -> std::result::Result<(), BoxError> {
        let wait_object = self.wait_object.lock().take();
        let outcome = match wait_object {
            Some(mut w) => w.wait(),
            None => Ok(()),
        };
        let elapsed = (self.timed && outcome.is_ok()).then(|| self.started.elapsed());
        self.report(elapsed);
        outcome
    }

    /// Wake anyone blocked in `wait_done`.
    fn mark_done(&self) {
        *self.done.lock() = true;
        self.done_cv.notify_all();
    }

    /// Block until whoever claimed this record has finished reaping it.
    fn wait_done(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.done_cv.wait(&mut done);
        }
    }
}

impl<R: Resource> std::fmt::Debug for SubmissionRecord<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionRecord")
            .field("id", &self.id)
            .field("resource", &self.resource)
            .field("placement", &self.placement)
            .field("reaped", &self.is_reaped())
            .finish()
    }
}

struct GroupInner<R> {
    records: Mutex<BTreeMap<u64, Arc<SubmissionRecord<R>>>>,
    next_id: AtomicU64,
    metrics: SelectionMetrics,
}

/// The outstanding submissions of one policy instance.
///
/// Record ids increase monotonically, so iteration order is submission order.
pub struct SubmissionGroup<R> {
    inner: Arc<GroupInner<R>>,
}

impl<R> Clone for SubmissionGroup<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Resource> SubmissionGroup<R> {
    pub(crate) fn new(metrics: SelectionMetrics) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                records: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(0),
                metrics,
            }),
        }
    }

    /// Register a wait object returned by a successful callable.
    pub(crate) fn register(
        &self,
        resource: R,
        placement: Placement,
        started: Instant,
        wait_object: Box<dyn WaitObject>,
        feedback: Option<Arc<dyn Feedback>>,
    ) -> Submission<R> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let record = Arc::new(SubmissionRecord {
            id,
            resource,
            placement,
            started,
            timed: wait_object.is_timed(),
            wait_object: Mutex::new(Some(wait_object)),
            reaped: AtomicBool::new(false),
            reported: AtomicBool::new(false),
            done: Mutex::new(false),
            done_cv: Condvar::new(),
            feedback,
        });

        if let Some(feedback) = &record.feedback {
            feedback.submitted(&placement);
        }
        self.inner.records.lock().insert(id, record.clone());
        self.inner.metrics.record_submission();
        record.report_if_complete();

        trace!(id, index = placement.index, "submission registered");
        Submission {
            record,
            group: self.clone(),
        }
    }

    /// Reap a record this caller has claimed.
    ///
    /// The record leaves the group even if its wait object panics; the
    /// panic then continues unwinding.
    fn reap(&self, record: &SubmissionRecord<R>) -> Result<()> {
        let _release = ReapGuard {
            group: self,
            record,
        };
        let outcome = record.complete();
        trace!(id = record.id, ok = outcome.is_ok(), "submission reaped");
        outcome.map_err(DsError::Resource)
    }

    /// Capture the records outstanding right now.
    pub fn snapshot(&self) -> GroupSnapshot<R> {
        let records = self.inner.records.lock().values().cloned().collect();
        GroupSnapshot {
            group: self.clone(),
            records,
        }
    }

    /// Number of records registered and not yet reaped.
    pub fn outstanding(&self) -> usize {
        self.inner.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding() == 0
    }
}

/// Removes a claimed record from its group and wakes its waiters on drop.
struct ReapGuard<'a, R: Resource> {
    group: &'a SubmissionGroup<R>,
    record: &'a SubmissionRecord<R>,
}

impl<R: Resource> Drop for ReapGuard<'_, R> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!(id = self.record.id, "wait object panicked");
        }
        // No-op when completion was already reported
        self.record.report(None);
        self.group.inner.records.lock().remove(&self.record.id);
        self.group.inner.metrics.record_completion();
        self.record.mark_done();
    }
}

impl<R: Resource> std::fmt::Debug for SubmissionGroup<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionGroup")
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Handle to one registered submission.
///
/// Cloning the handle does not duplicate the submission: it is still reaped
/// once, and any second wait fails with `DoubleWait`.
pub struct Submission<R> {
    record: Arc<SubmissionRecord<R>>,
    group: SubmissionGroup<R>,
}

impl<R> Clone for Submission<R> {
    fn clone(&self) -> Self {
        Self {
            record: self.record.clone(),
            group: self.group.clone(),
        }
    }
}

impl<R: Resource> Submission<R> {
    pub fn id(&self) -> u64 {
        self.record.id
    }

    /// The resource the work was submitted to.
    pub fn resource(&self) -> &R {
        &self.record.resource
    }

    /// Universe index of the resource the work was submitted to.
    pub fn index(&self) -> usize {
        self.record.placement.index
    }

    pub fn placement(&self) -> Placement {
        self.record.placement
    }

    /// Whether the submission has been claimed by a waiter.
    pub fn is_reaped(&self) -> bool {
        self.record.is_reaped()
    }

    /// Block until the work is complete and reap the record.
    ///
    /// Fails with `DoubleWait` if the record was already reaped, including
    /// when a group wait claimed it first.
    pub fn wait(&self) -> Result<()> {
        if !self.record.claim() {
            self.group.inner.metrics.double_waits.inc();
            warn!(id = self.record.id, "submission waited on twice");
            return Err(DsError::DoubleWait(self.record.id));
        }
        self.group.reap(&self.record)
    }
}

impl<R: Resource> std::fmt::Debug for Submission<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Submission").field(&self.record).finish()
    }
}

/// The submissions that were outstanding when the snapshot was taken.
pub struct GroupSnapshot<R> {
    group: SubmissionGroup<R>,
    records: Vec<Arc<SubmissionRecord<R>>>,
}

impl<R: Resource> GroupSnapshot<R> {
    /// Number of submissions in the snapshot.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Submission ids in submission order.
    pub fn ids(&self) -> Vec<u64> {
        self.records.iter().map(|r| r.id).collect()
    }

    /// Wait on every submission in the snapshot, in submission order.
    ///
    /// Keeps going after a failure so that every record is reaped, then
    /// returns the first error. Waiting a snapshot twice is harmless.
    pub fn wait(&self) -> Result<()> {
        let mut first_error = None;
        for record in &self.records {
            if record.claim() {
                if let Err(e) = self.group.reap(record) {
                    first_error.get_or_insert(e);
                }
            } else {
                record.wait_done();
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<R: Resource> std::fmt::Debug for GroupSnapshot<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupSnapshot")
            .field("ids", &self.ids())
            .finish()
    }
}

/// Anything [`crate::wait`] can block on: one submission, a group snapshot,
/// or a whole policy.
pub trait Wait {
    fn wait(&self) -> Result<()>;
}

impl<R: Resource> Wait for Submission<R> {
    fn wait(&self) -> Result<()> {
        Submission::wait(self)
    }
}

impl<R: Resource> Wait for GroupSnapshot<R> {
    fn wait(&self) -> Result<()> {
        GroupSnapshot::wait(self)
    }
}

impl<T: Wait + ?Sized> Wait for &T {
    fn wait(&self) -> Result<()> {
        (**self).wait()
    }
}
