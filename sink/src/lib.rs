//! Audit sink service: HMAC-verified, idempotency-keyed ingestion of
//! processed transactions into a durable log.

use std::path::Path;
use std::sync::Arc;

pub mod api;
pub mod error;
pub mod metrics;
pub mod signature;
pub mod store;

#[cfg(test)]
mod tests;

pub use api::Api;
pub use error::SinkError;

use metrics::SinkMetrics;
use store::AuditStore;

pub struct Sink {
    pub(crate) store: AuditStore,
    pub(crate) secret: String,
    pub(crate) metrics: SinkMetrics,
}

impl Sink {
    /// Open (or create) the audit database at `path`. `":memory:"` is
    /// accepted for tests.
    pub fn new(path: &Path, secret: &str) -> anyhow::Result<Arc<Self>> {
        let store = AuditStore::open(path)?;
        Ok(Arc::new(Self {
            store,
            secret: secret.to_string(),
            metrics: SinkMetrics::default(),
        }))
    }
}
