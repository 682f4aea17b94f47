use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct SinkMetrics {
    requests: AtomicU64,
    accepted: AtomicU64,
    deduped: AtomicU64,
    key_conflicts: AtomicU64,
    signature_failures: AtomicU64,
}

impl SinkMetrics {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deduped(&self) {
        self.deduped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_key_conflict(&self) {
        self.key_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_signature_failure(&self) {
        self.signature_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        append_counter(
            &mut out,
            "walletbridge_sink_requests_total",
            self.requests.load(Ordering::Relaxed),
        );
        append_counter(
            &mut out,
            "walletbridge_sink_accepted_total",
            self.accepted.load(Ordering::Relaxed),
        );
        append_counter(
            &mut out,
            "walletbridge_sink_deduped_total",
            self.deduped.load(Ordering::Relaxed),
        );
        append_counter(
            &mut out,
            "walletbridge_sink_key_conflicts_total",
            self.key_conflicts.load(Ordering::Relaxed),
        );
        append_counter(
            &mut out,
            "walletbridge_sink_signature_failures_total",
            self.signature_failures.load(Ordering::Relaxed),
        );
        out
    }
}

fn append_counter(out: &mut String, name: &str, value: u64) {
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}
