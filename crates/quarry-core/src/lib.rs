#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Shared problem/result wire protocol, solver plumbing, and the problem
//! pool for `quarry`.

/// Length-prefixed framing for problems and results.
pub mod wire;

/// Solver trait, registry, and the cooperative cancellation token.
pub mod solver;

/// Problem supply: current-problem tracking and result arbitration.
pub mod pool;

/// Hash-miner problem type.
pub mod miner;

/// Trivial problem type (no actual work; useful for tests).
pub mod trivial;
