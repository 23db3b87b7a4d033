//! The worker-side execution loop.
//!
//! A worker self-suspends between problems. The master wakes it with
//! SIGCONT once a problem frame is in its stdin pipe; it solves, writes
//! the result frame to stdout, suspends again. SIGHUP trips the
//! cooperative cancellation token the solver polls; SIGTERM ends the
//! process immediately with success, whatever it was doing.

use anyhow::Context as _;
use nix::sys::signal::{Signal, raise};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, warn};

use quarry_core::solver::{CancelToken, SolverRegistry};
use quarry_core::wire::{self, Problem, WorkResult};

/// Run the worker loop. Only returns on a protocol violation; a SIGTERM
/// from the master exits the process directly with success status.
pub async fn run_worker(registry: SolverRegistry) -> anyhow::Result<()> {
    let mut term = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    let mut hangup = signal(SignalKind::hangup()).context("install SIGHUP handler")?;

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                debug!("cancel requested; abandoning current attempt");
                cancel.cancel();
            }
        });
    }

    tokio::select! {
        _ = term.recv() => {
            debug!("terminate requested; exiting");
            // Exit here rather than unwinding: a parked stdin read would
            // otherwise hold the runtime open during shutdown.
            std::process::exit(0);
        }
        res = solve_loop(&registry, &cancel) => res,
    }
}

async fn solve_loop(registry: &SolverRegistry, cancel: &CancelToken) -> anyhow::Result<()> {
    let mut input = tokio::io::stdin();
    let mut output = tokio::io::stdout();
    loop {
        debug!("suspending until work arrives");
        raise(Signal::SIGSTOP).context("self-suspend")?;

        let prob = wire::read_problem(&mut input).await.context("read problem")?;
        debug!(id = prob.id, kind = prob.kind, var = prob.var, "problem received");

        let result = attempt(registry, &prob, cancel).await?;
        wire::write_result(&mut output, &result)
            .await
            .context("write result")?;
        cancel.clear();
    }
}

/// Run the solver for one problem on a blocking thread. Cancellation and
/// solver failure both collapse into a failed result; distinguishing them
/// is the pool's job, not ours.
async fn attempt(
    registry: &SolverRegistry,
    prob: &Problem,
    cancel: &CancelToken,
) -> anyhow::Result<WorkResult> {
    let solved = match registry.get(prob.kind) {
        Some(solver) => {
            let solver = solver.clone();
            let prob = prob.clone();
            let token = cancel.clone();
            tokio::task::spawn_blocking(move || solver.solve(&prob, &token))
                .await
                .context("solver task")?
        }
        None => {
            warn!(kind = prob.kind, "no solver for problem kind");
            None
        }
    };

    Ok(match solved {
        Some(result) if !cancel.is_cancelled() => result,
        Some(_) | None => WorkResult {
            id: prob.id,
            failed: true,
            payload: Vec::new(),
        },
    })
}
