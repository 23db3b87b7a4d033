#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Master/worker process coordination for `quarry`.
//!
//! The master spawns worker processes, feeds them problem variants over
//! per-worker pipes, and drives their life cycle with process-control
//! signals. Workers self-suspend between problems; the first accepted
//! solution triggers a cooperative cancellation broadcast to everyone
//! else still working on the same problem.

/// Public API types for the coordination engine.
pub mod api;

mod scheduler;
mod supervisor;
mod worker;

pub use api::{AuditEvent, MAX_WORKERS, MasterConfig, MasterOutcome, WorkerState};
pub use scheduler::run_master;
pub use worker::run_worker;
