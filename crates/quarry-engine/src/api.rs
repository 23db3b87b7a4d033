//! Public API types for the coordination engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Maximum supported number of worker processes.
pub const MAX_WORKERS: usize = 32;

/// Life-cycle state of a worker process, as observed by the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Spawned, initial self-suspend not yet observed.
    Started,
    /// Suspended with no result pending; ready for a problem.
    Idle,
    /// A problem was written and a resume signal sent; the wake has not
    /// been observed yet.
    Continued,
    /// Observed running, presumably solving.
    Running,
    /// Suspended with a result waiting to be drained.
    Stopped,
    /// Terminated normally.
    Exited,
    /// Terminated with a nonzero status or by an unexpected signal.
    Aborted,
}

impl WorkerState {
    /// Whether the worker process is gone for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Exited | WorkerState::Aborted)
    }
}

/// Configuration for the master process.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Number of worker processes to spawn (`1..=MAX_WORKERS`).
    pub workers: usize,
    /// Path to the worker executable.
    pub worker_bin: PathBuf,
}

/// Final outcome of a master run.
#[derive(Debug, Clone, Copy)]
pub struct MasterOutcome {
    /// Whether any worker aborted. The master's exit status is a failure
    /// exactly when this is set.
    pub aborted: bool,
}

impl MasterOutcome {
    /// Whether every worker exited normally.
    pub fn success(&self) -> bool {
        !self.aborted
    }
}

/// Audit stream payload. Pure notifications for external observers; they
/// never alter control flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// The master has begun executing.
    Started {
        /// Configured worker count.
        workers: usize,
    },
    /// A worker changed state. `from` is absent for the initial
    /// transition into [`WorkerState::Started`].
    StateChanged {
        /// Worker process id.
        pid: i32,
        /// Previous state, if any.
        from: Option<WorkerState>,
        /// New state.
        to: WorkerState,
    },
    /// A problem frame was written to a worker's pipe.
    ProblemSent {
        /// Worker process id.
        pid: i32,
        /// Problem identifier.
        id: u16,
        /// Problem kind tag.
        kind: u16,
        /// Variant index sent to this worker.
        var: u16,
        /// Variant count of the problem.
        nvars: u16,
        /// Encoded frame length in bytes.
        len: usize,
    },
    /// A result frame was read from a worker's pipe.
    ResultReceived {
        /// Worker process id.
        pid: i32,
        /// Problem identifier the result claims to solve.
        id: u16,
        /// Whether the attempt failed or was cancelled.
        failed: bool,
        /// Encoded frame length in bytes.
        len: usize,
    },
    /// A cooperative-cancel request was issued to a worker.
    CancelRequested {
        /// Worker process id.
        pid: i32,
    },
    /// The master is about to terminate.
    Finished {
        /// Whether any worker aborted.
        aborted: bool,
    },
}
