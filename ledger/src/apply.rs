use walletbridge_types::{ProcessedRecord, TransactionCommand};

use crate::ring::ProcessedRing;

/// Result of attempting to apply a command over a balance and ring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Balance after the attempt: unchanged when `inserted` is false.
    pub balance: i64,
    pub inserted: bool,
    /// The authoritative record for this txn id: the candidate on first
    /// apply, the stored original on replay.
    pub record: ProcessedRecord,
}

/// Apply `command` atop `current_balance`, deduplicating through `ring`.
///
/// Pure aside from the ring mutation; callers persist the returned state and
/// drive side effects only when `inserted` is true.
pub fn apply(
    current_balance: i64,
    command: &TransactionCommand,
    ring: &mut ProcessedRing,
    now_ms: i64,
) -> ApplyOutcome {
    let candidate = ProcessedRecord {
        txn_id: command.txn_id.clone(),
        delta: command.delta,
        balance_after: current_balance + command.delta,
        actor: command.actor.clone(),
        source: command.source,
        reason: command.reason.clone(),
        processed_at: now_ms,
    };

    let outcome = ring.record(candidate);
    if outcome.inserted {
        ApplyOutcome {
            balance: outcome.stored.balance_after,
            inserted: true,
            record: outcome.stored,
        }
    } else {
        ApplyOutcome {
            balance: current_balance,
            inserted: false,
            record: outcome.stored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RING_CAPACITY;
    use walletbridge_types::TxnSource;

    fn command(txn_id: &str, delta: i64) -> TransactionCommand {
        TransactionCommand {
            txn_id: txn_id.to_string(),
            user_id: "u-1".to_string(),
            delta,
            actor: "ops".to_string(),
            source: TxnSource::Discord,
            reason: None,
        }
    }

    #[test]
    fn credit_from_zero() {
        let mut ring = ProcessedRing::new(RING_CAPACITY).unwrap();
        let outcome = apply(0, &command("a", 10), &mut ring, 1_000);
        assert!(outcome.inserted);
        assert_eq!(outcome.balance, 10);
        assert_eq!(outcome.record.balance_after, 10);
        assert_eq!(outcome.record.processed_at, 1_000);
    }

    #[test]
    fn replay_is_a_noop_even_with_differing_delta() {
        let mut ring = ProcessedRing::new(RING_CAPACITY).unwrap();
        let first = apply(0, &command("a", 10), &mut ring, 1_000);

        let replay = apply(first.balance, &command("a", 999), &mut ring, 2_000);
        assert!(!replay.inserted);
        assert_eq!(replay.balance, 10);
        assert_eq!(replay.record, first.record);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn balance_conserves_sum_of_distinct_deltas() {
        let mut ring = ProcessedRing::new(RING_CAPACITY).unwrap();
        let mut balance = 0;
        let deltas = [10, -3, 42, -7, 5];
        for (i, delta) in deltas.iter().enumerate() {
            let outcome = apply(balance, &command(&format!("t{i}"), *delta), &mut ring, 0);
            balance = outcome.balance;
            // Interleave replays of the first command; none may move the balance.
            let replay = apply(balance, &command("t0", 10), &mut ring, 0);
            assert!(!replay.inserted);
            balance = replay.balance;
        }
        assert_eq!(balance, deltas.iter().sum::<i64>());
    }

    #[test]
    fn ring_stays_bounded_under_load() {
        let mut ring = ProcessedRing::new(RING_CAPACITY).unwrap();
        let mut balance = 0;
        for i in 0..1_000 {
            balance = apply(balance, &command(&format!("t{i}"), 1), &mut ring, 0).balance;
            assert!(ring.len() <= RING_CAPACITY);
        }
        assert_eq!(balance, 1_000);
    }

    #[test]
    fn eviction_boundary_reapplies_forgotten_txn() {
        let mut ring = ProcessedRing::new(RING_CAPACITY).unwrap();
        let mut balance = 0;
        for i in 1..=RING_CAPACITY + 1 {
            balance = apply(balance, &command(&format!("t{i}"), 1), &mut ring, 0).balance;
        }
        assert_eq!(balance, (RING_CAPACITY + 1) as i64);
        assert!(ring.get("t1").is_none());

        // t1 fell out of the window, so replaying it applies again and
        // evicts t2 in turn.
        let outcome = apply(balance, &command("t1", 1), &mut ring, 0);
        assert!(outcome.inserted);
        assert_eq!(outcome.balance, (RING_CAPACITY + 2) as i64);
        assert!(ring.get("t2").is_none());
        assert_eq!(ring.len(), RING_CAPACITY);
    }
}
