//! Hash-miner problem type.
//!
//! A problem is a block of bytes plus a difficulty; a solution is a nonce
//! such that `SHA-256(block ‖ nonce)` has at least `difficulty` leading
//! zero bits. Variant forms differ only in the starting nonce, spaced
//! evenly over the nonce space so concurrent searchers do not overlap.
//!
//! Payload layout (native endian):
//!   problem: `| bsize: u32 | nsize: u32 | difficulty: u16 | block | nonce |`
//!   result:  `| nsize: u32 | nonce |`

use rand::{Rng, RngCore as _};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::solver::{CancelToken, ConstructCtx, KIND_MINER, Solver};
use crate::wire::{Problem, WorkResult};

const PARAM_LEN: usize = 10;
const BLOCK_LEN: usize = 32;
const NONCE_LEN: usize = 8;

/// Difficulties below this are only used when the cap itself is lower.
const DIFFICULTY_FLOOR: u16 = 20;

/// Default difficulty cap, matching the usual CLI setting.
pub const DEFAULT_DIFFICULTY_CAP: u16 = 25;

/// Solver for the hash-miner problem kind.
pub struct MinerSolver {
    difficulty_cap: u16,
}

impl MinerSolver {
    /// Miner whose constructed problems draw a difficulty of at most
    /// `difficulty_cap` leading zero bits.
    pub fn new(difficulty_cap: u16) -> Self {
        Self { difficulty_cap }
    }
}

struct MinerProblem<'a> {
    difficulty: u16,
    block: &'a [u8],
    nonce: &'a [u8],
}

fn parse_problem(payload: &[u8]) -> Option<MinerProblem<'_>> {
    if payload.len() < PARAM_LEN {
        return None;
    }
    let bsize = u32::from_ne_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    let nsize = u32::from_ne_bytes([payload[4], payload[5], payload[6], payload[7]]) as usize;
    let difficulty = u16::from_ne_bytes([payload[8], payload[9]]);
    if nsize == 0 || payload.len() != PARAM_LEN + bsize + nsize {
        return None;
    }
    Some(MinerProblem {
        difficulty,
        block: &payload[PARAM_LEN..PARAM_LEN + bsize],
        nonce: &payload[PARAM_LEN + bsize..],
    })
}

fn parse_result(payload: &[u8]) -> Option<&[u8]> {
    if payload.len() < 4 {
        return None;
    }
    let nsize = u32::from_ne_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    (payload.len() == 4 + nsize).then(|| &payload[4..])
}

fn digest(block: &[u8], nonce: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(block);
    hasher.update(nonce);
    hasher.finalize().into()
}

fn leading_zero_bits(digest: &[u8]) -> u32 {
    let mut bits = 0;
    for byte in digest {
        if *byte == 0 {
            bits += 8;
            continue;
        }
        bits += byte.leading_zeros();
        break;
    }
    bits
}

/// Advance the nonce, treated as a base-256 counter with the least
/// significant digit first. Returns false once the space is exhausted.
fn bump_nonce(nonce: &mut [u8]) -> bool {
    for digit in nonce.iter_mut() {
        let (next, overflow) = digit.overflowing_add(1);
        *digit = next;
        if !overflow {
            return true;
        }
    }
    false
}

impl Solver for MinerSolver {
    fn construct(&self, id: u16, nvars: u16, ctx: &mut ConstructCtx<'_>) -> Option<Problem> {
        let mut block = [0u8; BLOCK_LEN];
        ctx.rng.fill_bytes(&mut block);
        let difficulty = if self.difficulty_cap <= DIFFICULTY_FLOOR {
            self.difficulty_cap
        } else {
            ctx.rng.random_range(DIFFICULTY_FLOOR..=self.difficulty_cap)
        };

        let mut payload = Vec::with_capacity(PARAM_LEN + BLOCK_LEN + NONCE_LEN);
        payload.extend_from_slice(&(BLOCK_LEN as u32).to_ne_bytes());
        payload.extend_from_slice(&(NONCE_LEN as u32).to_ne_bytes());
        payload.extend_from_slice(&difficulty.to_ne_bytes());
        payload.extend_from_slice(&block);
        payload.extend_from_slice(&[0u8; NONCE_LEN]);

        Some(Problem {
            kind: KIND_MINER,
            id,
            nvars,
            var: 0,
            payload,
        })
    }

    fn vary(&self, prob: &mut Problem, var: u16) {
        let Some(parsed) = parse_problem(&prob.payload) else {
            return;
        };
        let nonce_at = prob.payload.len() - parsed.nonce.len();
        prob.payload[nonce_at..].fill(0);
        if prob.nvars > 0 {
            // The last byte is the most significant counter digit; spreading
            // it over the variants spaces the starting nonces evenly.
            let last = prob.payload.len() - 1;
            prob.payload[last] = ((u32::from(var) * 256) / u32::from(prob.nvars)) as u8;
            prob.var = var;
        }
    }

    fn solve(&self, prob: &Problem, cancel: &CancelToken) -> Option<WorkResult> {
        let parsed = parse_problem(&prob.payload)?;
        let mut nonce = parsed.nonce.to_vec();
        let mut iterations: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                debug!(id = prob.id, iterations, "miner attempt cancelled");
                return None;
            }
            iterations += 1;
            let hash = digest(parsed.block, &nonce);
            if leading_zero_bits(&hash) >= u32::from(parsed.difficulty) {
                debug!(
                    id = prob.id,
                    iterations,
                    digest = %hex::encode(hash),
                    "nonce found"
                );
                let mut payload = Vec::with_capacity(4 + nonce.len());
                payload.extend_from_slice(&(nonce.len() as u32).to_ne_bytes());
                payload.extend_from_slice(&nonce);
                return Some(WorkResult {
                    id: prob.id,
                    failed: false,
                    payload,
                });
            }
            if !bump_nonce(&mut nonce) {
                debug!(id = prob.id, iterations, "nonce space exhausted");
                return None;
            }
        }
    }

    fn check(&self, result: &WorkResult, prob: &Problem) -> bool {
        if result.failed {
            return false;
        }
        let Some(parsed) = parse_problem(&prob.payload) else {
            return false;
        };
        let Some(nonce) = parse_result(&result.payload) else {
            return false;
        };
        leading_zero_bits(&digest(parsed.block, nonce)) >= u32::from(parsed.difficulty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn build(difficulty_cap: u16, nvars: u16) -> (MinerSolver, Problem) {
        let solver = MinerSolver::new(difficulty_cap);
        let mut rng = StdRng::seed_from_u64(42);
        let prob = solver
            .construct(1, nvars, &mut ConstructCtx { rng: &mut rng })
            .unwrap();
        (solver, prob)
    }

    #[test]
    fn leading_zero_bits_counts_prefix() {
        assert_eq!(leading_zero_bits(&[0x80, 0x00]), 0);
        assert_eq!(leading_zero_bits(&[0x01]), 7);
        assert_eq!(leading_zero_bits(&[0x00, 0xff]), 8);
        assert_eq!(leading_zero_bits(&[0x00, 0x00]), 16);
        assert_eq!(leading_zero_bits(&[0x00, 0x10, 0xff]), 11);
    }

    #[test]
    fn bump_nonce_carries_and_exhausts() {
        let mut nonce = vec![0xff, 0x00];
        assert!(bump_nonce(&mut nonce));
        assert_eq!(nonce, vec![0x00, 0x01]);

        let mut last = vec![0xff, 0xff];
        assert!(!bump_nonce(&mut last));
        assert_eq!(last, vec![0x00, 0x00]);
    }

    #[test]
    fn vary_spaces_starting_nonces() {
        let (solver, mut prob) = build(4, 4);
        solver.vary(&mut prob, 2);
        assert_eq!(prob.var, 2);
        let parsed = parse_problem(&prob.payload).unwrap();
        assert_eq!(parsed.nonce[NONCE_LEN - 1], 128);
        assert!(parsed.nonce[..NONCE_LEN - 1].iter().all(|b| *b == 0));
    }

    #[test]
    fn solve_then_check_round_trip() {
        let (solver, prob) = build(4, 1);
        let result = solver.solve(&prob, &CancelToken::new()).unwrap();
        assert!(!result.failed);
        assert!(solver.check(&result, &prob));
    }

    #[test]
    fn cancelled_attempt_returns_none() {
        let (solver, prob) = build(25, 1);
        let token = CancelToken::new();
        token.cancel();
        assert!(solver.solve(&prob, &token).is_none());
    }

    #[test]
    fn check_rejects_failed_and_malformed_results() {
        let (solver, prob) = build(4, 1);
        let mut result = solver.solve(&prob, &CancelToken::new()).unwrap();

        let failed = WorkResult {
            id: prob.id,
            failed: true,
            payload: Vec::new(),
        };
        assert!(!solver.check(&failed, &prob));

        // A payload shorter than its declared nonce size cannot check out.
        result.payload.pop();
        assert!(!solver.check(&result, &prob));
    }

    #[test]
    fn low_cap_pins_difficulty() {
        let (_, prob) = build(4, 1);
        let parsed = parse_problem(&prob.payload).unwrap();
        assert_eq!(parsed.difficulty, 4);
    }
}
