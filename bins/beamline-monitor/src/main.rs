//! CLI launcher (spec component: external interface in spec.md §6).
//!
//! Rank 0 is both the launcher and the collector: it parses the
//! configuration once, re-execs itself as `--rank 1 .. node_pool_size-1`
//! for the workers, then runs the collector loop itself. Workers are
//! plain re-invocations of this same binary — there is no separate worker
//! executable, following `bins/obsidian`'s single-binary-per-role shape.

mod config;

use anyhow::{Context, Result};
use beamline_config::ParameterStore;
use beamline_engine::{run_collector, run_worker};
use beamline_icc::{DEFAULT_EVENTS_PORT, DEFAULT_FEEDBACK_PORT, current_machine_ip};
use beamline_processor::CrystallographyProcessor;
use beamline_source::FileListSource;
use clap::Parser;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;

/// Launches the distributed crystallography event-processing pipeline.
#[derive(Parser, Debug)]
#[command(name = "beamline-monitor")]
struct Cli {
    /// Source-adapter-specific source string. For the bundled file-list
    /// adapter this is the path to a newline-delimited list of raw frame
    /// files.
    source: String,

    #[arg(long, default_value = "./monitor.yaml")]
    config: PathBuf,

    #[arg(long = "node_pool_size")]
    node_pool_size: u32,

    /// Internal: set when this process is a re-exec'd worker. Not part of
    /// the public CLI surface.
    #[arg(long, hide = true)]
    rank: Option<u32>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("INFO")))
        .init();

    let cli = Cli::parse();
    let pool_size = cli.node_pool_size;
    anyhow::ensure!(
        pool_size >= 2,
        "node_pool_size must be at least 2 (one collector, one worker)"
    );

    let store = ParameterStore::load(&cli.config)
        .with_context(|| format!("loading configuration file '{}'", cli.config.display()))?;

    let ip = current_machine_ip().context("autodetecting local IP address")?;
    let events_addr = format!("{ip}:{DEFAULT_EVENTS_PORT}");
    let feedback_addr = format!("{ip}:{DEFAULT_FEEDBACK_PORT}");

    match cli.rank {
        Some(rank) => run_as_worker(rank, pool_size, &store, &cli.source, &events_addr, &feedback_addr),
        None => run_as_launcher(&cli, pool_size, &store, &events_addr, &feedback_addr),
    }
}

/// Rank 0: spawns every worker rank as a child process, then runs the
/// collector loop in this process until every worker has reported
/// `{"end": true}` — or, if SIGINT arrives first, until every worker has
/// acknowledged a `{"stop": true}` broadcast (spec.md §5).
fn run_as_launcher(
    cli: &Cli,
    pool_size: u32,
    store: &ParameterStore,
    events_addr: &str,
    feedback_addr: &str,
) -> Result<()> {
    let exe = std::env::current_exe().context("resolving own executable path")?;
    let mut children = Vec::new();
    for rank in 1..pool_size {
        let child = Command::new(&exe)
            .arg(&cli.source)
            .arg("--config")
            .arg(&cli.config)
            .arg("--node_pool_size")
            .arg(pool_size.to_string())
            .arg("--rank")
            .arg(rank.to_string())
            .spawn()
            .with_context(|| format!("spawning worker rank {rank}"))?;
        children.push((rank, child));
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        tracing::info!("received SIGINT, initiating orderly shutdown");
        shutdown_handler.store(true, Ordering::SeqCst);
    })
    .context("installing SIGINT handler")?;

    let mut processor = CrystallographyProcessor::new(config::crystallography_params(store, 0)?);
    let collector_result = run_collector(0, pool_size, &mut processor, events_addr, feedback_addr, shutdown);

    for (rank, mut child) in children {
        match child.wait() {
            Ok(status) if status.success() => {}
            Ok(status) => tracing::warn!(rank, ?status, "worker exited with a non-zero status"),
            Err(e) => tracing::warn!(rank, error = %e, "failed to wait on worker process"),
        }
    }

    collector_result.context("collector loop failed")?;
    println!("Shutting down RANK: 0");
    Ok(())
}

/// Any rank >= 1: runs the source + processor pair through the worker loop
/// until the event source is exhausted.
fn run_as_worker(
    rank: u32,
    pool_size: u32,
    store: &ParameterStore,
    source: &str,
    events_addr: &str,
    feedback_addr: &str,
) -> Result<()> {
    let (rows, cols) = config::detector_shape(store)?;
    let mut event_source =
        FileListSource::from_list_file(source, rows, cols).with_context(|| format!("opening file list '{source}'"))?;
    let mut processor = CrystallographyProcessor::new(config::crystallography_params(store, rank)?);

    run_worker(rank, pool_size, &mut event_source, &mut processor, events_addr, feedback_addr)
        .with_context(|| format!("worker loop failed for rank {rank}"))?;
    println!("Shutting down RANK: {rank}");
    Ok(())
}
