use rand::{Rng, RngCore};
use std::time::Duration;

/// Attempts budgeted for publishes, HTTP calls, and conflicting writes.
pub const DEFAULT_MAX_RETRIES: u32 = 4;

const BASE_MS: u64 = 250;
const JITTER_MS: u64 = 100;

/// Delay before retry number `attempt` (zero-based): 250 ms doubling per
/// attempt, plus uniform jitter in [0, 100 ms].
pub fn retry_backoff(rng: &mut impl RngCore, attempt: u32) -> Duration {
    let exp = attempt.min(10);
    let backoff_ms = BASE_MS.saturating_mul(1u64 << exp);
    let jitter_ms = rng.gen_range(0..=JITTER_MS);
    Duration::from_millis(backoff_ms.saturating_add(jitter_ms))
}

/// Sample a backoff delay without holding an RNG across an await point.
pub fn sampled_backoff(attempt: u32) -> Duration {
    let mut rng = rand::thread_rng();
    retry_backoff(&mut rng, attempt)
}
