//! Trivial problem type: no actual work, every attempt succeeds.

use tracing::debug;

use crate::solver::{CancelToken, ConstructCtx, KIND_TRIVIAL, Solver};
use crate::wire::{Problem, WorkResult};

/// Solver for the trivial problem kind.
pub struct TrivialSolver;

impl Solver for TrivialSolver {
    fn construct(&self, id: u16, nvars: u16, _ctx: &mut ConstructCtx<'_>) -> Option<Problem> {
        Some(Problem {
            kind: KIND_TRIVIAL,
            id,
            nvars,
            var: 0,
            payload: Vec::new(),
        })
    }

    fn vary(&self, prob: &mut Problem, var: u16) {
        prob.var = var;
    }

    fn solve(&self, prob: &Problem, _cancel: &CancelToken) -> Option<WorkResult> {
        debug!(id = prob.id, "trivial solve");
        Some(WorkResult {
            id: prob.id,
            failed: false,
            payload: Vec::new(),
        })
    }

    fn check(&self, result: &WorkResult, _prob: &Problem) -> bool {
        !result.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn solve_succeeds_and_check_accepts() {
        let solver = TrivialSolver;
        let mut rng = StdRng::seed_from_u64(0);
        let prob = solver
            .construct(3, 2, &mut ConstructCtx { rng: &mut rng })
            .unwrap();
        let result = solver.solve(&prob, &CancelToken::new()).unwrap();
        assert_eq!(result.id, 3);
        assert!(!result.failed);
        assert!(solver.check(&result, &prob));
    }

    #[test]
    fn check_rejects_failed_result() {
        let solver = TrivialSolver;
        let prob = Problem {
            kind: KIND_TRIVIAL,
            id: 1,
            nvars: 1,
            var: 0,
            payload: Vec::new(),
        };
        let failed = WorkResult {
            id: 1,
            failed: true,
            payload: Vec::new(),
        };
        assert!(!solver.check(&failed, &prob));
    }
}
