//! Policy From Config Example
//!
//! Builds a policy and its compute queues from layered configuration:
//! an optional TOML file, `DYNSEL_*` environment variables, then CLI flags.
//! Runs a batch of jobs and prints the Prometheus metrics it produced.
//!
//! Run:
//!   cargo run --example policy_from_config -- --ds-policy auto_tune --ds-queue-count 3
//!   DYNSEL_POLICY=dynamic_load cargo run --example policy_from_config

use std::path::PathBuf;

use clap::Parser;
use dynsel::{get_resources, submit, wait, with_key, FunctionKey, SelectionArgs, SelectionBuilder};
use prometheus::{Encoder, Registry, TextEncoder};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Run a batch of jobs through a configured selection policy")]
struct Args {
    /// Optional configuration file (TOML, YAML, or JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of jobs to submit
    #[arg(long, default_value_t = 64)]
    jobs: usize,

    #[command(flatten)]
    selection: SelectionArgs,
}

fn checksum(seed: u64) -> u64 {
    (0..50_000u64).fold(seed, |acc, i| {
        acc.rotate_left(5) ^ std::hint::black_box(i)
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let registry = Registry::new();

    let mut builder = SelectionBuilder::new();
    if let Some(path) = &args.config {
        builder = builder.file(path);
    }
    let builder = builder
        .env_prefix("DYNSEL")
        .with_cli_args(&args.selection)
        .prometheus_registry(registry.clone());

    let config = builder.config()?;
    println!(
        "policy = {}, {} queues x {} threads",
        config.policy, config.queue_count, config.queue_threads
    );

    let policy = builder.build_with_queues()?;
    let queues = get_resources(&policy);

    // Auto-tune needs a key; the other policies ignore it
    let key = FunctionKey::from_name("checksum");
    for job in 0..args.jobs {
        submit(with_key(&policy, key), move |q| {
            q.submit(move || {
                std::hint::black_box(checksum(job as u64));
            })
        })?;
    }
    wait(&policy)?;

    for q in &queues {
        println!("  {}: {} in flight", q, q.in_flight());
    }
    if let Some(tuned) = policy.as_auto_tune() {
        println!("  warmed up: {}", tuned.is_warmed_up(key));
    }

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    println!("\n{}", String::from_utf8(buffer)?);
    Ok(())
}
