//! Problem supply: current-problem tracking and result arbitration.
//!
//! The pool owns a single notion of "the current problem". At most one
//! logical problem is outstanding at a time; it is replaced only after the
//! previous one was solved or the supply ran dry. The coordination layer
//! reaches the pool exclusively through [`ProblemSource`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::solver::{ConstructCtx, NUM_KINDS, SolverRegistry};
use crate::wire::{Problem, WorkResult};

/// Arbitration outcome for a submitted result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The result solves the current problem, which is now cleared.
    Accepted,
    /// The result does not solve the problem, or the problem is no longer
    /// current (a stale solve raced with an accepted one).
    Rejected,
    /// The result carried the failure flag and was never checked.
    Invalid,
}

/// The two-call interface through which the coordination layer consumes
/// problems. `next_variant` returning `None` for variant 0 means the whole
/// workload is exhausted.
pub trait ProblemSource {
    /// A fresh snapshot of the current problem, rewritten into variant
    /// `var` of `nvars`; `None` when the supply is exhausted or `var` is
    /// out of range.
    fn next_variant(&mut self, nvars: u16, var: u16) -> Option<Problem>;

    /// Arbitrate a result claimed to solve `problem`. `Accepted` clears
    /// the current problem, so later calls never offer its id again.
    fn report(&mut self, result: &WorkResult, problem: &Problem) -> Verdict;
}

/// Configuration for [`ProblemPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Total number of problems to generate.
    pub problems: usize,
    /// Bit mask of enabled problem kinds.
    pub kinds: u32,
    /// Difficulty cap for miner problems.
    pub difficulty_cap: u16,
    /// RNG seed; random when absent.
    pub seed: Option<u64>,
}

/// Randomized problem supply over the enabled kinds.
pub struct ProblemPool {
    registry: SolverRegistry,
    current: Option<Problem>,
    remaining: usize,
    next_id: u16,
    rng: StdRng,
}

impl ProblemPool {
    /// Pool generating `cfg.problems` problems over the kinds enabled in
    /// `cfg.kinds`.
    pub fn new(cfg: PoolConfig) -> Self {
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            registry: SolverRegistry::with_kinds(cfg.kinds, cfg.difficulty_cap),
            current: None,
            remaining: cfg.problems,
            next_id: 0,
            rng,
        }
    }

    fn generate(&mut self, nvars: u16) {
        // Pick kinds at random until one of them is constructible. Each
        // construction attempt consumes one slot of the supply.
        while self.remaining > 0 && self.current.is_none() {
            let kind = self.rng.random_range(0..NUM_KINDS);
            let Some(solver) = self.registry.get(kind) else {
                continue;
            };
            self.remaining -= 1;
            self.next_id = self.next_id.wrapping_add(1);
            debug!(
                kind,
                id = self.next_id,
                remaining = self.remaining,
                "generating problem"
            );
            self.current = solver.construct(
                self.next_id,
                nvars,
                &mut ConstructCtx { rng: &mut self.rng },
            );
        }
    }
}

impl ProblemSource for ProblemPool {
    fn next_variant(&mut self, nvars: u16, var: u16) -> Option<Problem> {
        if self.current.is_none() && self.registry.enabled_count() > 0 {
            self.generate(nvars);
        }
        let prob = self.current.as_mut()?;
        if prob.nvars > 0 && var >= prob.nvars {
            return None;
        }
        let solver = self.registry.get(prob.kind)?;
        solver.vary(prob, var);
        Some(prob.clone())
    }

    fn report(&mut self, result: &WorkResult, problem: &Problem) -> Verdict {
        if result.failed {
            return Verdict::Invalid;
        }
        let Some(solver) = self.registry.get(problem.kind) else {
            return Verdict::Invalid;
        };
        if !solver.check(result, problem) {
            return Verdict::Rejected;
        }
        // Only the first correct answer for the current problem is
        // accepted; a stale solve for an already-cleared id is rejected so
        // the cancellation broadcast fires exactly once per problem.
        if self
            .current
            .as_ref()
            .is_some_and(|cur| cur.id == problem.id)
        {
            debug!(id = problem.id, "problem solved; clearing current");
            self.current = None;
            Verdict::Accepted
        } else {
            Verdict::Rejected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{CancelToken, KIND_NULL, KIND_TRIVIAL, Solver};
    use crate::trivial::TrivialSolver;

    fn trivial_pool(problems: usize) -> ProblemPool {
        ProblemPool::new(PoolConfig {
            problems,
            kinds: 1 << KIND_TRIVIAL,
            difficulty_cap: 25,
            seed: Some(1),
        })
    }

    fn solve(prob: &Problem) -> WorkResult {
        TrivialSolver.solve(prob, &CancelToken::new()).unwrap()
    }

    #[test]
    fn no_enabled_kinds_yields_nothing() {
        let mut pool = ProblemPool::new(PoolConfig {
            problems: 5,
            kinds: 1 << KIND_NULL,
            difficulty_cap: 25,
            seed: Some(1),
        });
        assert!(pool.next_variant(1, 0).is_none());
    }

    #[test]
    fn supply_exhausts_after_configured_count() {
        let mut pool = trivial_pool(2);

        let first = pool.next_variant(1, 0).unwrap();
        assert_eq!(pool.report(&solve(&first), &first), Verdict::Accepted);

        let second = pool.next_variant(1, 0).unwrap();
        assert_ne!(second.id, first.id);
        assert_eq!(pool.report(&solve(&second), &second), Verdict::Accepted);

        assert!(pool.next_variant(1, 0).is_none());
    }

    #[test]
    fn cleared_problem_id_is_never_reoffered() {
        let mut pool = trivial_pool(3);
        let first = pool.next_variant(2, 0).unwrap();
        assert_eq!(pool.report(&solve(&first), &first), Verdict::Accepted);

        while let Some(prob) = pool.next_variant(2, 1) {
            assert_ne!(prob.id, first.id);
            assert_eq!(pool.report(&solve(&prob), &prob), Verdict::Accepted);
        }
    }

    #[test]
    fn stale_result_after_acceptance_is_rejected() {
        let mut pool = trivial_pool(2);
        let first = pool.next_variant(2, 0).unwrap();
        let racer = pool.next_variant(2, 1).unwrap();
        assert_eq!(first.id, racer.id);

        assert_eq!(pool.report(&solve(&first), &first), Verdict::Accepted);
        // A second correct answer for the same problem arrives late.
        assert_eq!(pool.report(&solve(&racer), &racer), Verdict::Rejected);
    }

    #[test]
    fn failed_result_is_invalid_and_problem_stays_current() {
        let mut pool = trivial_pool(1);
        let prob = pool.next_variant(1, 0).unwrap();
        let failed = WorkResult {
            id: prob.id,
            failed: true,
            payload: Vec::new(),
        };
        assert_eq!(pool.report(&failed, &prob), Verdict::Invalid);

        // The problem is re-offered until someone actually solves it.
        let again = pool.next_variant(1, 0).unwrap();
        assert_eq!(again.id, prob.id);
    }

    #[test]
    fn out_of_range_variant_is_refused() {
        let mut pool = trivial_pool(1);
        assert!(pool.next_variant(2, 5).is_none());
        // The problem itself is still current and reachable.
        assert!(pool.next_variant(2, 1).is_some());
    }
}
