//! Worker process supervision: spawning, the shared state table, and the
//! asynchronous child-status notification path.
//!
//! The state table is mutated both by the scheduler and by the SIGCHLD
//! drain; every mutation happens inside a short mutex critical section
//! that is never held across an await point. Every transition bumps a
//! generation counter on a watch channel so the scheduler can wait for
//! "the next change after the one I have seen" without missing any.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context as _;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::signal::unix::Signal as SignalStream;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use quarry_core::wire::Problem;

use crate::api::{AuditEvent, MAX_WORKERS, WorkerState};

/// Per-worker handles owned by the scheduler: the child itself and the
/// two pipe endpoints. The pipe pair belongs exclusively to the
/// (scheduler, worker) pair and is never shared across workers.
pub(crate) struct WorkerLink {
    pub(crate) slot: usize,
    pub(crate) pid: i32,
    /// Held so the child is not handed to the runtime's background reaper
    /// before its exit has been observed through the supervisor's own
    /// waitpid drain. Dropped only once the run is over.
    #[allow(dead_code)]
    child: Child,
    pub(crate) problem_tx: ChildStdin,
    pub(crate) result_rx: ChildStdout,
    /// Problem last dispatched to this worker, kept for arbitration of
    /// the result it will hand back.
    pub(crate) assigned: Option<Problem>,
}

struct WorkerEntry {
    pid: i32,
    state: WorkerState,
}

pub(crate) struct Supervisor {
    table: Mutex<Vec<WorkerEntry>>,
    changed: watch::Sender<u64>,
    events: broadcast::Sender<AuditEvent>,
    aborted: AtomicBool,
}

/// State a stop notification lands in. Anything past `Started` that stops
/// has a result pending: a worker can finish and stop before its wake was
/// even observed.
fn stop_state(from: WorkerState) -> WorkerState {
    match from {
        WorkerState::Started => WorkerState::Idle,
        _ => WorkerState::Stopped,
    }
}

fn exit_state(code: i32) -> WorkerState {
    if code == 0 {
        WorkerState::Exited
    } else {
        WorkerState::Aborted
    }
}

/// Whether a worker in this state should receive the cancellation
/// broadcast: it holds, or is about to hold, work for the problem that
/// was just solved.
fn cancel_eligible(state: WorkerState) -> bool {
    matches!(
        state,
        WorkerState::Continued | WorkerState::Running | WorkerState::Stopped
    )
}

fn send_signal(pid: i32, sig: Signal) {
    if let Err(err) = kill(Pid::from_raw(pid), sig) {
        // The worker may already be gone; its exit notification will tell.
        if err != Errno::ESRCH {
            warn!(pid, signal = ?sig, "kill failed: {err}");
        }
    }
}

impl Supervisor {
    pub(crate) fn new(events: broadcast::Sender<AuditEvent>) -> Arc<Self> {
        let (changed, _) = watch::channel(0);
        Arc::new(Self {
            table: Mutex::new(Vec::new()),
            changed,
            events,
            aborted: AtomicBool::new(false),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<WorkerEntry>> {
        self.table.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn emit(&self, event: AuditEvent) {
        let _ = self.events.send(event);
    }

    fn bump(&self) {
        self.changed.send_modify(|generation| *generation += 1);
    }

    /// Spawn `count` workers with piped stdin/stdout. On any failure the
    /// already-spawned workers are killed so none are left orphaned.
    pub(crate) fn spawn_workers(
        &self,
        count: usize,
        worker_bin: &Path,
    ) -> anyhow::Result<Vec<WorkerLink>> {
        anyhow::ensure!(
            (1..=MAX_WORKERS).contains(&count),
            "worker count {count} out of range 1..={MAX_WORKERS}"
        );
        let mut links = Vec::with_capacity(count);
        for slot in 0..count {
            match self.spawn_one(slot, worker_bin) {
                Ok(link) => links.push(link),
                Err(err) => {
                    for link in &links {
                        send_signal(link.pid, Signal::SIGKILL);
                    }
                    return Err(err);
                }
            }
        }
        Ok(links)
    }

    fn spawn_one(&self, slot: usize, worker_bin: &Path) -> anyhow::Result<WorkerLink> {
        // The lock is taken before the spawn so the status drain cannot
        // observe a notification for a pid that is not in the table yet.
        let mut table = self.lock();
        let mut child = Command::new(worker_bin)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn worker {slot} ({})", worker_bin.display()))?;
        let pid = child
            .id()
            .map(|pid| pid as i32)
            .context("spawned worker has no pid")?;
        let problem_tx = child.stdin.take().context("worker stdin not piped")?;
        let result_rx = child.stdout.take().context("worker stdout not piped")?;

        table.push(WorkerEntry {
            pid,
            state: WorkerState::Started,
        });
        self.emit(AuditEvent::StateChanged {
            pid,
            from: None,
            to: WorkerState::Started,
        });
        self.bump();
        drop(table);

        debug!(slot, pid, "worker spawned");
        Ok(WorkerLink {
            slot,
            pid,
            child,
            problem_tx,
            result_rx,
            assigned: None,
        })
    }

    pub(crate) fn state(&self, slot: usize) -> WorkerState {
        self.lock()[slot].state
    }

    pub(crate) fn all_terminal(&self) -> bool {
        self.lock().iter().all(|entry| entry.state.is_terminal())
    }

    pub(crate) fn any_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub(crate) fn generation(&self) -> u64 {
        *self.changed.borrow()
    }

    /// Wait until the generation counter moves past `seen`. Returns
    /// immediately if it already has, so a notification landing between a
    /// scan and this call is never missed. The closure must only look at
    /// the counter itself: it runs under the watch channel's value lock,
    /// and touching the state table there would invert the lock order
    /// against the mutation sites.
    pub(crate) async fn wait_change(&self, seen: u64) {
        let mut rx = self.changed.subscribe();
        let _ = rx.wait_for(|generation| *generation != seen).await;
    }

    /// Wait until the worker has left its initial `Started` state.
    pub(crate) async fn wait_past_started(&self, slot: usize) {
        loop {
            let seen = self.generation();
            if self.state(slot) != WorkerState::Started {
                return;
            }
            self.wait_change(seen).await;
        }
    }

    /// Wait until the worker's exit has been observed.
    pub(crate) async fn wait_terminal(&self, slot: usize) {
        loop {
            let seen = self.generation();
            if self.state(slot).is_terminal() {
                return;
            }
            self.wait_change(seen).await;
        }
    }

    /// Idle → Continued: the problem is already in the pipe; wake the
    /// worker. State write and signal share one critical section so the
    /// continue notification cannot be processed first.
    pub(crate) fn dispatched(&self, slot: usize) {
        let mut table = self.lock();
        let entry = &mut table[slot];
        if entry.state != WorkerState::Idle {
            // The worker died under us; leave the reaped state alone.
            return;
        }
        entry.state = WorkerState::Continued;
        let pid = entry.pid;
        self.emit(AuditEvent::StateChanged {
            pid,
            from: Some(WorkerState::Idle),
            to: WorkerState::Continued,
        });
        send_signal(pid, Signal::SIGCONT);
        self.bump();
    }

    /// Stopped → Idle once the pending result was drained or discarded.
    pub(crate) fn release(&self, slot: usize) {
        let mut table = self.lock();
        let entry = &mut table[slot];
        if entry.state != WorkerState::Stopped {
            return;
        }
        entry.state = WorkerState::Idle;
        self.emit(AuditEvent::StateChanged {
            pid: entry.pid,
            from: Some(WorkerState::Stopped),
            to: WorkerState::Idle,
        });
        self.bump();
    }

    /// Cooperative-cancel broadcast to every other worker still holding
    /// work for the problem that was just solved.
    pub(crate) fn cancel_others(&self, winner: usize) {
        let table = self.lock();
        for (slot, entry) in table.iter().enumerate() {
            if slot == winner || !cancel_eligible(entry.state) {
                continue;
            }
            self.emit(AuditEvent::CancelRequested { pid: entry.pid });
            send_signal(entry.pid, Signal::SIGHUP);
        }
    }

    /// Ask a worker to terminate. The resume signal follows because a
    /// suspended worker cannot act on the request until it is woken.
    pub(crate) fn request_exit(&self, slot: usize) {
        let table = self.lock();
        let pid = table[slot].pid;
        send_signal(pid, Signal::SIGTERM);
        send_signal(pid, Signal::SIGCONT);
    }

    /// Forcibly kill a worker whose pipe stream is unusable (protocol
    /// violation). The reaper records the abort.
    pub(crate) fn kill(&self, slot: usize) {
        let table = self.lock();
        send_signal(table[slot].pid, Signal::SIGKILL);
    }

    /// SIGCHLD-driven notification path. Each tick drains every pending
    /// child status in one non-blocking sweep; ends once all workers are
    /// terminal.
    pub(crate) async fn run_notifier(self: Arc<Self>, mut sigchld: SignalStream) {
        loop {
            self.drain_child_status();
            {
                let table = self.lock();
                if !table.is_empty() && table.iter().all(|entry| entry.state.is_terminal()) {
                    return;
                }
            }
            if sigchld.recv().await.is_none() {
                return;
            }
        }
    }

    fn drain_child_status(&self) {
        let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
        loop {
            match waitpid(None, Some(flags)) {
                Ok(WaitStatus::StillAlive) => break,
                Ok(status) => self.apply_status(status),
                Err(Errno::ECHILD) => break,
                Err(err) => {
                    warn!("waitpid failed: {err}");
                    break;
                }
            }
        }
    }

    fn apply_status(&self, status: WaitStatus) {
        let Some(pid) = status.pid() else {
            return;
        };
        let pid = pid.as_raw();
        let mut table = self.lock();
        let Some(entry) = table.iter_mut().find(|entry| entry.pid == pid) else {
            debug!(pid, "status notification for unknown child");
            return;
        };
        let from = entry.state;
        let to = match status {
            WaitStatus::Stopped(..) => stop_state(from),
            WaitStatus::Continued(..) => WorkerState::Running,
            WaitStatus::Exited(_, code) => exit_state(code),
            WaitStatus::Signaled(_, sig, _) => {
                debug!(pid, signal = ?sig, "worker killed by signal");
                WorkerState::Aborted
            }
            _ => return,
        };
        if to == WorkerState::Aborted {
            self.aborted.store(true, Ordering::SeqCst);
        }
        entry.state = to;
        self.emit(AuditEvent::StateChanged {
            pid,
            from: Some(from),
            to,
        });
        self.bump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_maps_started_to_idle_and_the_rest_to_stopped() {
        assert_eq!(stop_state(WorkerState::Started), WorkerState::Idle);
        assert_eq!(stop_state(WorkerState::Running), WorkerState::Stopped);
        assert_eq!(stop_state(WorkerState::Continued), WorkerState::Stopped);
        assert_eq!(stop_state(WorkerState::Idle), WorkerState::Stopped);
    }

    #[test]
    fn exit_status_selects_terminal_state() {
        assert_eq!(exit_state(0), WorkerState::Exited);
        assert_eq!(exit_state(1), WorkerState::Aborted);
        assert_eq!(exit_state(127), WorkerState::Aborted);
    }

    #[test]
    fn cancellation_skips_workers_without_work() {
        assert!(cancel_eligible(WorkerState::Continued));
        assert!(cancel_eligible(WorkerState::Running));
        assert!(cancel_eligible(WorkerState::Stopped));

        assert!(!cancel_eligible(WorkerState::Started));
        assert!(!cancel_eligible(WorkerState::Idle));
        assert!(!cancel_eligible(WorkerState::Exited));
        assert!(!cancel_eligible(WorkerState::Aborted));
    }
}
