//! # dynsel
//!
//! **Dynamic resource selection**
//!
//! Pick which compute resource (a device queue, a worker pool, an
//! accelerator handle) runs each unit of work, keep track of what is in
//! flight, and learn from how long work took.
//!
//! ## Features
//!
//! - **Selection policies**: static, fixed offset, round-robin, least-loaded,
//!   and auto-tuning per function key
//! - **Submission tracking**: every submission is registered in its policy's
//!   submission group and reaped exactly once
//! - **Timing feedback**: auto-tune profiles each resource, then keeps using
//!   the fastest one for that workload
//! - **Deferred initialization**: build a policy first, hand it resources later
//! - **Compute queues**: a ready-made rayon-backed resource whose events can
//!   be blocked on or awaited
//! - **Flexible Configuration**: files (TOML/YAML/JSON), environment
//!   variables, code, and CLI arguments via clap
//! - **Metrics**: Prometheus counters per policy
//!
//! ## Quick Start
//!
//! ```ignore
//! use dynsel::{queue::build_queues, FunctionKey, AutoTunePolicy};
//!
//! fn main() -> dynsel::Result<()> {
//!     let queues = build_queues("worker", 4, 2)?;
//!     let policy = AutoTunePolicy::new(queues);
//!     let key = FunctionKey::from_name("checksum");
//!
//!     for chunk in chunks {
//!         dynsel::submit(dynsel::with_key(&policy, key), |q| {
//!             q.submit(move || checksum(chunk))
//!         })?;
//!     }
//!
//!     // Wait on everything submitted so far
//!     dynsel::wait(&policy)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Protocol
//!
//! | Function | Effect |
//! |----------|--------|
//! | [`select`] / [`select_for`] | choose a resource, submit nothing |
//! | [`submit`] / [`try_submit`] | choose, run the callable, register its wait object |
//! | [`submit_and_wait`] | submit, then wait on that submission |
//! | [`wait`] | block on a submission, a group snapshot, or a whole policy |
//! | [`unwrap`] | the resource a selection is bound to |
//! | [`get_resources`] | the universe, in order |
//! | [`get_submission_group`] | snapshot of outstanding submissions |
//! | [`initialize`] | give a deferred policy its universe |
//!
//! A callable returns a [`WaitObject`]: `()` for "nothing to wait on",
//! [`Completed`] for work that ran inline and should be timed, or a handle
//! such as [`queue::QueueEvent`] for asynchronous work.
//!
//! ## Deferred Initialization
//!
//! ```ignore
//! use dynsel::{Deferred, RoundRobinPolicy};
//!
//! let policy = RoundRobinPolicy::<Device>::new(Deferred);
//! assert!(dynsel::get_resources(&policy).is_empty());
//! dynsel::initialize(&policy, discover_devices())?;
//! ```
//!
//! ## Configuration
//!
//! Configuration sources are merged in order (later sources override earlier):
//!
//! 1. Default values
//! 2. Config files (via `.file()`)
//! 3. Environment variables (via `.env_prefix()`)
//! 4. Programmatic overrides
//! 5. CLI arguments (via `.with_cli_args()`)
//!
//! ### Config File Example (TOML)
//!
//! ```toml
//! policy = "auto_tune"
//! queue_count = 4
//! queue_threads = 2
//!
//! [auto_tune]
//! samples_per_resource = 2
//! resample_interval_ms = 5000
//! smoothing = { kind = "ema", alpha = 0.3 }
//! ```
//!
//! ### Environment Variables
//!
//! With `.env_prefix("DYNSEL")`:
//! - `DYNSEL_POLICY=round_robin`
//! - `DYNSEL_QUEUE_COUNT=4`
//! - `DYNSEL_AUTO_TUNE__SAMPLES_PER_RESOURCE=2`
//!
//! ### CLI Arguments
//!
//! ```ignore
//! use clap::Parser;
//! use dynsel::{SelectionArgs, SelectionBuilder};
//!
//! #[derive(Parser)]
//! struct MyArgs {
//!     #[command(flatten)]
//!     selection: SelectionArgs,
//! }
//!
//! let args = MyArgs::parse();
//! let policy = SelectionBuilder::new()
//!     .file("dynsel.toml")
//!     .env_prefix("DYNSEL")
//!     .with_cli_args(&args.selection)
//!     .build_with_queues()?;
//! ```

pub mod builder;
pub mod config;
mod dispatch;
pub mod error;
pub mod key;
pub mod metrics;
pub mod policy;
pub mod queue;
pub mod submission;
pub mod universe;

pub use builder::{SelectionArgs, SelectionBuilder};
pub use config::{PolicyKind, SelectionConfig};
pub use dispatch::{
    get_resources, get_submission_group, initialize, select, select_for, submit,
    submit_and_wait, try_submit, try_submit_and_wait, unwrap, wait, with_key, Keyed, Submit,
};
pub use error::{BoxError, DsError, Result};
pub use key::FunctionKey;
pub use metrics::SelectionMetrics;
pub use policy::{
    AnyPolicy, AutoTuneKnobs, AutoTunePolicy, DynamicLoadPolicy, FixedResourcePolicy, Policy,
    PolicyCore, RoundRobinPolicy, Selection, StaticPolicy, TimingEstimate, TimingSmoothing,
};
pub use queue::{ComputeQueue, QueueError, QueueEvent};
pub use submission::{
    Completed, Feedback, GroupSnapshot, Placement, Submission, Wait, WaitObject,
};
pub use universe::{Deferred, Init, Resource, Universe};
