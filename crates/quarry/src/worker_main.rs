//! Worker process entry point. Spawned by `quarry` with its stdin/stdout
//! wired to the problem/result pipes; not meant to be run by hand.

use tracing_subscriber::EnvFilter;

use quarry_core::miner::DEFAULT_DIFFICULTY_CAP;
use quarry_core::solver::SolverRegistry;
use quarry_engine::run_worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Stdout carries the result frames, so all logging goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    // A worker never constructs problems, but it must be able to solve
    // whatever kind the master sends.
    let registry = SolverRegistry::with_all(DEFAULT_DIFFICULTY_CAP);
    run_worker(registry).await
}
