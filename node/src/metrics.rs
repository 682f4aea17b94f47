use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-node counters. Cheap to bump from any task; snapshots feed logs and
/// operator tooling.
#[derive(Default)]
pub struct NodeMetrics {
    commands_received: AtomicU64,
    commands_applied: AtomicU64,
    commands_deduped: AtomicU64,
    commands_invalid: AtomicU64,
    commands_dropped: AtomicU64,
    not_owner: AtomicU64,
    leases_lost: AtomicU64,
    store_failures: AtomicU64,
    broadcast_failures: AtomicU64,
    audit_failures: AtomicU64,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct NodeMetricsSnapshot {
    pub commands_received: u64,
    pub commands_applied: u64,
    pub commands_deduped: u64,
    pub commands_invalid: u64,
    pub commands_dropped: u64,
    pub not_owner: u64,
    pub leases_lost: u64,
    pub store_failures: u64,
    pub broadcast_failures: u64,
    pub audit_failures: u64,
}

impl NodeMetrics {
    pub fn record_received(&self) {
        self.commands_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_applied(&self) {
        self.commands_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deduped(&self) {
        self.commands_deduped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.commands_invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.commands_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_owner(&self) {
        self.not_owner.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lease_lost(&self) {
        self.leases_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broadcast_failure(&self) {
        self.broadcast_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audit_failure(&self) {
        self.audit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> NodeMetricsSnapshot {
        NodeMetricsSnapshot {
            commands_received: self.commands_received.load(Ordering::Relaxed),
            commands_applied: self.commands_applied.load(Ordering::Relaxed),
            commands_deduped: self.commands_deduped.load(Ordering::Relaxed),
            commands_invalid: self.commands_invalid.load(Ordering::Relaxed),
            commands_dropped: self.commands_dropped.load(Ordering::Relaxed),
            not_owner: self.not_owner.load(Ordering::Relaxed),
            leases_lost: self.leases_lost.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            broadcast_failures: self.broadcast_failures.load(Ordering::Relaxed),
            audit_failures: self.audit_failures.load(Ordering::Relaxed),
        }
    }
}
