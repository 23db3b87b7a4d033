//! The master scheduling loop.

use anyhow::Context as _;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use quarry_core::pool::{ProblemSource, Verdict};
use quarry_core::wire::{self, WireError};

use crate::api::{AuditEvent, MasterConfig, MasterOutcome, WorkerState};
use crate::supervisor::{Supervisor, WorkerLink};

/// Run the master: spawn the workers, schedule problem variants over them
/// until the source is exhausted, then drive everyone to exit. Returns
/// once every worker has been reaped.
pub async fn run_master(
    cfg: MasterConfig,
    source: &mut dyn ProblemSource,
    events: broadcast::Sender<AuditEvent>,
) -> anyhow::Result<MasterOutcome> {
    let _ = events.send(AuditEvent::Started {
        workers: cfg.workers,
    });

    let supervisor = Supervisor::new(events.clone());
    // The stream must exist before the first child does, or an early
    // notification could be lost.
    let sigchld = signal(SignalKind::child()).context("install SIGCHLD handler")?;
    let mut links = supervisor.spawn_workers(cfg.workers, &cfg.worker_bin)?;
    tokio::spawn(supervisor.clone().run_notifier(sigchld));

    // Block until every worker has announced itself with its initial
    // self-suspend (or died trying).
    for link in &links {
        supervisor.wait_past_started(link.slot).await;
    }
    info!(workers = links.len(), "workers ready");

    let nvars = cfg.workers as u16;
    let outcome = loop {
        let seen = supervisor.generation();

        if supervisor.all_terminal() {
            break MasterOutcome {
                aborted: supervisor.any_aborted(),
            };
        }

        if source.next_variant(nvars, 0).is_some() {
            schedule_pass(&supervisor, &mut links, source, nvars, &events).await;
        } else {
            shutdown_pass(&supervisor, &links).await;
            if supervisor.all_terminal() {
                break MasterOutcome {
                    aborted: supervisor.any_aborted(),
                };
            }
        }

        supervisor.wait_change(seen).await;
    };

    // Release the pipe descriptors before reporting the end.
    drop(links);
    let _ = events.send(AuditEvent::Finished {
        aborted: outcome.aborted,
    });
    Ok(outcome)
}

/// One round-robin scan while the source still offers variants: hand a
/// fresh variant to each idle worker, harvest each stopped one.
async fn schedule_pass(
    supervisor: &Supervisor,
    links: &mut [WorkerLink],
    source: &mut dyn ProblemSource,
    nvars: u16,
    events: &broadcast::Sender<AuditEvent>,
) {
    for link in links.iter_mut() {
        match supervisor.state(link.slot) {
            WorkerState::Idle => {
                let Some(prob) = source.next_variant(nvars, link.slot as u16) else {
                    continue;
                };
                match wire::write_problem(&mut link.problem_tx, &prob).await {
                    Ok(()) => {}
                    Err(WireError::Io(err))
                        if err.kind() == std::io::ErrorKind::BrokenPipe =>
                    {
                        // The worker is gone; its exit notification will
                        // surface the state on its own.
                        debug!(pid = link.pid, "problem write hit a closed pipe");
                    }
                    Err(err) => {
                        warn!(pid = link.pid, "problem write failed: {err}");
                        supervisor.kill(link.slot);
                        continue;
                    }
                }
                let _ = events.send(AuditEvent::ProblemSent {
                    pid: link.pid,
                    id: prob.id,
                    kind: prob.kind,
                    var: prob.var,
                    nvars: prob.nvars,
                    len: prob.frame_len(),
                });
                link.assigned = Some(prob);
                supervisor.dispatched(link.slot);
            }
            WorkerState::Stopped => {
                let result = match wire::read_result(&mut link.result_rx).await {
                    Ok(result) => result,
                    Err(err) => {
                        warn!(pid = link.pid, "result read failed: {err}");
                        supervisor.kill(link.slot);
                        continue;
                    }
                };
                let _ = events.send(AuditEvent::ResultReceived {
                    pid: link.pid,
                    id: result.id,
                    failed: result.failed,
                    len: result.frame_len(),
                });
                let verdict = match link.assigned.take() {
                    Some(prob) => source.report(&result, &prob),
                    None => {
                        warn!(pid = link.pid, "result from a worker with no assignment");
                        Verdict::Invalid
                    }
                };
                if verdict == Verdict::Accepted {
                    debug!(pid = link.pid, id = result.id, "solution accepted");
                    supervisor.cancel_others(link.slot);
                }
                supervisor.release(link.slot);
            }
            _ => {}
        }
    }
}

/// The source is exhausted: discard leftover results and drive every
/// remaining worker to exit, waiting for each termination to be observed.
/// Workers caught mid-transition are picked up on a later pass.
async fn shutdown_pass(supervisor: &Supervisor, links: &[WorkerLink]) {
    for link in links {
        if supervisor.state(link.slot) == WorkerState::Stopped {
            // An in-flight result at shutdown is discarded unread.
            supervisor.release(link.slot);
        }
        if matches!(
            supervisor.state(link.slot),
            WorkerState::Idle | WorkerState::Running
        ) {
            supervisor.request_exit(link.slot);
            supervisor.wait_terminal(link.slot).await;
        }
    }
}
