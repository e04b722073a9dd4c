//! Auto-Tune Queues Example
//!
//! Two compute queues with different widths (1 thread and 4 threads) and two
//! workloads. The parallel workload splits across the queue's threads with
//! rayon, so it should settle on the wide queue. The serial workload gains
//! nothing from width and may settle on either.
//!
//! Run: cargo run --example auto_tune_queues --release

use std::time::Instant;

use dynsel::{submit, wait, with_key, AutoTuneKnobs, AutoTunePolicy, ComputeQueue, FunctionKey};
use rayon::prelude::*;
use tracing_subscriber::EnvFilter;

const ROUNDS: usize = 40;
const ITEMS: u64 = 2_000_000;

/// Sum of squares split across whatever rayon pool runs it.
fn parallel_sum() -> u64 {
    (0..ITEMS)
        .into_par_iter()
        .map(|i| std::hint::black_box(i).wrapping_mul(i))
        .reduce(|| 0, u64::wrapping_add)
}

/// The same sum on a single thread.
fn serial_sum() -> u64 {
    (0..ITEMS)
        .map(|i| std::hint::black_box(i).wrapping_mul(i))
        .fold(0, u64::wrapping_add)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Auto-Tune Queues Example ===\n");

    let queues = vec![ComputeQueue::new("narrow", 1)?, ComputeQueue::new("wide", 4)?];
    for q in &queues {
        println!("  {} ({} threads)", q, q.threads());
    }
    println!();

    let knobs = AutoTuneKnobs::new().with_samples_per_resource(2);
    let policy = AutoTunePolicy::with_knobs(queues, knobs);

    let workloads: [(&str, fn() -> u64); 2] = [("parallel", parallel_sum), ("serial", serial_sum)];

    for (name, work) in workloads {
        let key = FunctionKey::from_name(name);
        let mut placements = Vec::with_capacity(ROUNDS);
        let start = Instant::now();

        for _ in 0..ROUNDS {
            let sub = submit(with_key(&policy, key), move |q| {
                q.submit(move || {
                    std::hint::black_box(work());
                })
            })?;
            placements.push(sub.resource().name().to_string());
            wait(&sub)?;
        }

        println!("Workload '{}': {:.2?} total", name, start.elapsed());
        for (i, estimate) in policy
            .estimates(key)
            .unwrap_or_default()
            .iter()
            .enumerate()
        {
            let mean = estimate
                .mean()
                .map(|d| format!("{:.2?}", d))
                .unwrap_or_else(|| "-".to_string());
            println!("  resource {}: {} samples, mean {}", i, estimate.samples, mean);
        }
        let tail = &placements[placements.len() - 5..];
        println!("  last placements: {:?}\n", tail);
    }

    wait(&policy)?;
    Ok(())
}
