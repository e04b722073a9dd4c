//! A CPU compute queue backed by a dedicated rayon thread pool.
//!
//! [`ComputeQueue`] is a ready-made resource: it accepts `FnOnce()` work and
//! returns a [`QueueEvent`] that can be blocked on (it is a
//! [`WaitObject`]) or awaited (it is a `Future`).
//!
//! Each queue owns its pool, so a universe of queues with different thread
//! counts gives policies real performance differences to choose between.
//!
//! # Example
//!
//! ```ignore
//! use dynsel::queue::build_queues;
//! use dynsel::RoundRobinPolicy;
//!
//! let queues = build_queues("worker", 4, 2)?;
//! let policy = RoundRobinPolicy::new(queues);
//! let submission = dynsel::submit(&policy, |q| q.submit(|| crunch()))?;
//! dynsel::wait(&submission)?;
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use diatomic_waker::DiatomicWaker;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::debug;

use crate::error::{BoxError, Result};
use crate::submission::WaitObject;
use crate::universe::Universe;

/// Errors reported through a [`QueueEvent`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The submitted work panicked; the payload message is kept.
    #[error("queued work panicked: {0}")]
    WorkPanicked(String),
}

struct QueueInner {
    name: String,
    threads: usize,
    pool: rayon::ThreadPool,
    in_flight: Arc<AtomicUsize>,
}

/// A named compute queue with its own worker threads.
///
/// Queues compare equal only to clones of themselves.
#[derive(Clone)]
pub struct ComputeQueue {
    inner: Arc<QueueInner>,
}

impl ComputeQueue {
    /// Build a queue with `threads` workers named `{name}-{NNNN}`.
    pub fn new(name: impl Into<String>, threads: usize) -> Result<Self> {
        let name = name.into();
        let threads = threads.max(1);
        let thread_prefix = name.clone();
        let start_name = name.clone();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{}-{:04}", thread_prefix, i))
            .start_handler(move |i| {
                debug!(queue = %start_name, thread = i, "queue thread started");
            })
            .build()?;

        debug!(queue = %name, threads, "compute queue created");
        Ok(Self {
            inner: Arc::new(QueueInner {
                name,
                threads,
                pool,
                in_flight: Arc::new(AtomicUsize::new(0)),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn threads(&self) -> usize {
        self.inner.threads
    }

    /// Work submitted to this queue that has not finished yet.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Run `work` on one of this queue's threads.
    ///
    /// A panic inside `work` is caught and reported by the returned event.
    pub fn submit<F>(&self, work: F) -> QueueEvent
    where
        F: FnOnce() + Send + 'static,
    {
        let state = Arc::new(EventState::new());
        let completion = state.clone();
        let in_flight = self.inner.in_flight.clone();
        in_flight.fetch_add(1, Ordering::AcqRel);

        self.inner.pool.spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(work))
                .map_err(|payload| QueueError::WorkPanicked(panic_message(&*payload)));
            in_flight.fetch_sub(1, Ordering::AcqRel);
            completion.complete(outcome);
        });

        QueueEvent { state }
    }

    /// Run `work` on this queue and block until it returns its value.
    ///
    /// Rayon parallel iterators used inside `work` run on this queue's threads.
    pub fn install<T, F>(&self, work: F) -> T
    where
        F: FnOnce() -> T + Send,
        T: Send,
    {
        self.inner.pool.install(work)
    }
}

impl PartialEq for ComputeQueue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ComputeQueue {}

impl std::fmt::Debug for ComputeQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeQueue")
            .field("name", &self.inner.name)
            .field("threads", &self.inner.threads)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl std::fmt::Display for ComputeQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} threads)", self.inner.name, self.inner.threads)
    }
}

/// Build `count` queues named `{prefix}-q{i}`, each with `threads` workers.
pub fn build_queues(prefix: &str, count: usize, threads: usize) -> Result<Universe<ComputeQueue>> {
    let queues = (0..count)
        .map(|i| ComputeQueue::new(format!("{}-q{}", prefix, i), threads))
        .collect::<Result<Vec<_>>>()?;
    Ok(Universe::from(queues))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Shared state between a queue worker and the event it completes.
struct EventState {
    outcome: Mutex<Option<std::result::Result<(), QueueError>>>,
    done: Condvar,
    waker: DiatomicWaker,
}

impl EventState {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            done: Condvar::new(),
            waker: DiatomicWaker::new(),
        }
    }

    fn complete(&self, outcome: std::result::Result<(), QueueError>) {
        *self.outcome.lock() = Some(outcome);
        self.done.notify_all();
        self.waker.notify();
    }

    fn peek(&self) -> Option<std::result::Result<(), QueueError>> {
        self.outcome.lock().clone()
    }
}

/// Completion event for work submitted to a [`ComputeQueue`].
///
/// Waiting is idempotent: every wait after completion returns the same
/// outcome.
pub struct QueueEvent {
    state: Arc<EventState>,
}

impl QueueEvent {
    /// Block until the work has finished.
    pub fn wait_outcome(&self) -> std::result::Result<(), QueueError> {
        let mut outcome = self.state.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            self.state.done.wait(&mut outcome);
        }
    }

    pub fn is_done(&self) -> bool {
        self.state.outcome.lock().is_some()
    }
}

impl WaitObject for QueueEvent {
    fn wait(&mut self) -> std::result::Result<(), BoxError> {
        self.wait_outcome().map_err(BoxError::from)
    }

    fn is_complete(&self) -> bool {
        self.is_done()
    }
}

impl Future for QueueEvent {
    type Output = std::result::Result<(), QueueError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.state.peek() {
            return Poll::Ready(outcome);
        }

        // SAFETY: a QueueEvent is polled by one task at a time, so register()
        // is never called concurrently on this waker.
        unsafe {
            self.state.waker.register(cx.waker());
        }

        // Completion may have happened between the first check and registration
        match self.state.peek() {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for QueueEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEvent")
            .field("done", &self.is_done())
            .finish()
    }
}
