//! Pluggable problem-type solvers.
//!
//! Each problem kind provides four methods: construct a new problem, derive
//! a variant form of it, attempt to solve one variant, and check whether a
//! submitted result actually solves a problem. The coordination layer never
//! inspects problem payloads; it only routes them by kind tag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::RngCore;

use crate::miner::MinerSolver;
use crate::trivial::TrivialSolver;
use crate::wire::{Problem, WorkResult};

/// Reserved kind with no solver. A problem of this kind can never be
/// constructed; the tag exists so an unknown kind on the wire has a name.
pub const KIND_NULL: u16 = 0;

/// The trivial problem kind.
pub const KIND_TRIVIAL: u16 = 1;

/// The hash-miner problem kind.
pub const KIND_MINER: u16 = 2;

/// Number of known problem kinds, reserved tag included.
pub const NUM_KINDS: u16 = 3;

/// Cooperative cancellation token shared between a solver and the signal
/// path that requests the abort. Never preemptive: the solver is only
/// guaranteed to notice at its own poll points.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// New, untripped token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the current attempt.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Re-arm the token for the next attempt.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Context handed to problem constructors.
pub struct ConstructCtx<'a> {
    /// Randomness source for problem generation.
    pub rng: &'a mut dyn RngCore,
}

/// Methods a problem kind provides.
pub trait Solver: Send + Sync {
    /// Construct a fresh problem with the given id and variant count, or
    /// `None` if one cannot be produced.
    fn construct(&self, id: u16, nvars: u16, ctx: &mut ConstructCtx<'_>) -> Option<Problem>;

    /// Rewrite `prob` in place into variant form `var`.
    fn vary(&self, prob: &mut Problem, var: u16);

    /// Attempt to solve one variant. Returns `None` when the attempt was
    /// cancelled or the search space was exhausted; the caller turns that
    /// into a failed result.
    fn solve(&self, prob: &Problem, cancel: &CancelToken) -> Option<WorkResult>;

    /// Whether `result` solves `prob`. A result carrying the failure flag
    /// never does.
    fn check(&self, result: &WorkResult, prob: &Problem) -> bool;
}

/// Solver lookup table indexed by problem kind.
#[derive(Clone)]
pub struct SolverRegistry {
    slots: Vec<Option<Arc<dyn Solver>>>,
}

impl SolverRegistry {
    /// Registry with no solvers enabled.
    pub fn empty() -> Self {
        Self {
            slots: vec![None; NUM_KINDS as usize],
        }
    }

    /// Registry with the kinds selected by `mask` (bit `k` enables kind
    /// `k`). Bits for unknown kinds, or for kinds without a solver, are
    /// ignored.
    pub fn with_kinds(mask: u32, miner_difficulty_cap: u16) -> Self {
        let mut registry = Self::empty();
        for kind in 0..NUM_KINDS {
            if mask & (1 << kind) == 0 {
                continue;
            }
            match kind {
                KIND_TRIVIAL => registry.register(kind, Arc::new(TrivialSolver)),
                KIND_MINER => {
                    registry.register(kind, Arc::new(MinerSolver::new(miner_difficulty_cap)))
                }
                _ => {}
            }
        }
        registry
    }

    /// Registry with every known solver enabled. Used by workers, which
    /// must be able to handle whatever kind the master sends.
    pub fn with_all(miner_difficulty_cap: u16) -> Self {
        Self::with_kinds(!0, miner_difficulty_cap)
    }

    /// Register a solver for a kind, replacing any previous one.
    pub fn register(&mut self, kind: u16, solver: Arc<dyn Solver>) {
        if let Some(slot) = self.slots.get_mut(kind as usize) {
            *slot = Some(solver);
        }
    }

    /// Solver for `kind`, if one is registered.
    pub fn get(&self, kind: u16) -> Option<&Arc<dyn Solver>> {
        self.slots.get(kind as usize)?.as_ref()
    }

    /// Number of kinds with a registered solver.
    pub fn enabled_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}
