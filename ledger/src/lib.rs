//! Pure ledger mutation logic: the processed-transaction ring and the
//! idempotent applier. No I/O lives here; persistence and transport wrap
//! these primitives.

mod apply;
mod ring;

pub use apply::{apply, ApplyOutcome};
pub use ring::{ProcessedRing, RecordOutcome, RingError};

/// Number of processed records retained per user.
///
/// Replays of transaction ids older than the newest `RING_CAPACITY` distinct
/// ids re-apply; operators size this against their expected replay window.
pub const RING_CAPACITY: usize = 64;
