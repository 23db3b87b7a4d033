mod audit;
mod cli;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::error;
use tracing_subscriber::EnvFilter;

use quarry_core::pool::{PoolConfig, ProblemPool};
use quarry_engine::{AuditEvent, MasterConfig, run_master};

use crate::audit::AuditWriter;
use crate::cli::Cli;

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let worker_bin = match &cli.worker_bin {
        Some(path) => path.clone(),
        None => cli::default_worker_bin()?,
    };

    let mut pool = ProblemPool::new(PoolConfig {
        problems: cli.problems,
        kinds: cli.kind_mask(),
        difficulty_cap: cli.difficulty,
        seed: cli.seed,
    });

    let (event_tx, event_rx) = broadcast::channel::<AuditEvent>(1024);
    let writer = match &cli.audit_log {
        Some(path) => Some(AuditWriter::create(path)?),
        None => None,
    };
    let pump = audit::spawn_event_pump(event_rx, writer);

    let outcome = run_master(
        MasterConfig {
            workers: usize::from(cli.workers),
            worker_bin,
        },
        &mut pool,
        event_tx.clone(),
    )
    .await?;

    // Dropping our sender lets the pump drain and finish once the engine's
    // clones are gone too.
    drop(event_tx);
    let _ = pump.await;

    if !outcome.success() {
        error!("one or more workers aborted");
        std::process::exit(1);
    }
    Ok(())
}
