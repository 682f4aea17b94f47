use std::collections::HashMap;

use thiserror::Error;
use walletbridge_types::ProcessedRecord;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingError {
    #[error("ring capacity must be positive")]
    ZeroCapacity,
}

/// Outcome of [`ProcessedRing::record`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordOutcome {
    /// False when the txn id was already present; `stored` is then the
    /// original record, not the candidate.
    pub inserted: bool,
    pub stored: ProcessedRecord,
}

/// Bounded FIFO map of recently processed transaction records.
///
/// Lookup by txn id is O(1); when full, recording a new id evicts the oldest
/// insertion. Not thread-safe: the owning session task holds it exclusively.
#[derive(Debug)]
pub struct ProcessedRing {
    slots: Vec<Option<ProcessedRecord>>,
    index: HashMap<String, usize>,
    cursor: usize,
}

impl ProcessedRing {
    pub fn new(capacity: usize) -> Result<Self, RingError> {
        if capacity == 0 {
            return Err(RingError::ZeroCapacity);
        }
        Ok(Self {
            slots: vec![None; capacity],
            index: HashMap::with_capacity(capacity),
            cursor: 0,
        })
    }

    /// Build a ring seeded with `records`, applied oldest first.
    pub fn with_records<I>(capacity: usize, records: I) -> Result<Self, RingError>
    where
        I: IntoIterator<Item = ProcessedRecord>,
    {
        let mut ring = Self::new(capacity)?;
        for record in records {
            ring.record(record);
        }
        Ok(ring)
    }

    /// Record `candidate` unless its txn id is already present.
    ///
    /// First writer wins: a duplicate returns the stored record untouched.
    pub fn record(&mut self, candidate: ProcessedRecord) -> RecordOutcome {
        if let Some(&slot) = self.index.get(&candidate.txn_id) {
            let stored = self.slots[slot]
                .clone()
                .unwrap_or_else(|| unreachable!("indexed slot is populated"));
            return RecordOutcome {
                inserted: false,
                stored,
            };
        }

        if let Some(evicted) = self.slots[self.cursor].take() {
            self.index.remove(&evicted.txn_id);
        }
        self.index.insert(candidate.txn_id.clone(), self.cursor);
        self.slots[self.cursor] = Some(candidate.clone());
        self.cursor = (self.cursor + 1) % self.slots.len();

        RecordOutcome {
            inserted: true,
            stored: candidate,
        }
    }

    pub fn get(&self, txn_id: &str) -> Option<&ProcessedRecord> {
        self.index
            .get(txn_id)
            .and_then(|&slot| self.slots[slot].as_ref())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Populated slots in reverse insertion order.
    pub fn newest_first(&self) -> Vec<ProcessedRecord> {
        let capacity = self.slots.len();
        let mut out = Vec::with_capacity(self.len());
        for offset in 1..=capacity {
            let slot = (self.cursor + capacity - offset) % capacity;
            if let Some(record) = &self.slots[slot] {
                out.push(record.clone());
            }
        }
        out
    }

    /// Populated slots in insertion order, the shape persisted in the
    /// wallet profile.
    pub fn oldest_first(&self) -> Vec<ProcessedRecord> {
        let mut out = self.newest_first();
        out.reverse();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use walletbridge_types::TxnSource;

    fn record(txn_id: &str, delta: i64) -> ProcessedRecord {
        ProcessedRecord {
            txn_id: txn_id.to_string(),
            delta,
            balance_after: delta,
            actor: "ops".to_string(),
            source: TxnSource::Game,
            reason: None,
            processed_at: 0,
        }
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(ProcessedRing::new(0).unwrap_err(), RingError::ZeroCapacity);
    }

    #[test]
    fn records_and_looks_up() {
        let mut ring = ProcessedRing::new(4).unwrap();
        let outcome = ring.record(record("a", 1));
        assert!(outcome.inserted);
        assert_eq!(ring.get("a").unwrap().delta, 1);
        assert!(ring.get("b").is_none());
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn duplicate_returns_original_record() {
        let mut ring = ProcessedRing::new(4).unwrap();
        ring.record(record("a", 1));

        let mut replay = record("a", 99);
        replay.balance_after = 99;
        let outcome = ring.record(replay);
        assert!(!outcome.inserted);
        assert_eq!(outcome.stored.delta, 1);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn full_ring_evicts_oldest() {
        let mut ring = ProcessedRing::new(3).unwrap();
        for id in ["a", "b", "c"] {
            ring.record(record(id, 1));
        }
        assert!(ring.record(record("d", 1)).inserted);

        assert!(ring.get("a").is_none());
        assert!(ring.get("b").is_some());
        assert_eq!(ring.len(), 3);

        // "a" was evicted, so it may be recorded again and "b" goes next.
        assert!(ring.record(record("a", 2)).inserted);
        assert!(ring.get("b").is_none());
    }

    #[test]
    fn newest_first_reverses_insertion_order() {
        let mut ring = ProcessedRing::new(3).unwrap();
        for id in ["a", "b", "c", "d"] {
            ring.record(record(id, 1));
        }
        let ids: Vec<String> = ring.newest_first().into_iter().map(|r| r.txn_id).collect();
        assert_eq!(ids, vec!["d", "c", "b"]);
        let ids: Vec<String> = ring.oldest_first().into_iter().map(|r| r.txn_id).collect();
        assert_eq!(ids, vec!["b", "c", "d"]);
    }

    #[test]
    fn seeded_ring_preserves_order_and_bound() {
        let seed: Vec<ProcessedRecord> = (0..5).map(|i| record(&format!("t{i}"), 1)).collect();
        let ring = ProcessedRing::with_records(3, seed).unwrap();
        assert_eq!(ring.len(), 3);
        assert!(ring.get("t0").is_none());
        assert!(ring.get("t1").is_none());
        assert!(ring.get("t4").is_some());
        let ids: Vec<String> = ring.oldest_first().into_iter().map(|r| r.txn_id).collect();
        assert_eq!(ids, vec!["t2", "t3", "t4"]);
    }
}
