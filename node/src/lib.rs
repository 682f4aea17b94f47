//! Game-node runtime for the wallet bridge.
//!
//! A node subscribes to the global command topic, claims per-user sessions
//! through the store's lease, applies commands idempotently over the
//! versioned wallet profile, and reports successful mutations to the update
//! topics and the audit sink.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;
use walletbridge_client::{AuditClient, Transport, WalletStore};

pub mod dispatcher;
pub mod emitter;
pub mod engine;
pub mod metrics;
pub mod mutator;
pub mod session;


pub use engine::Engine;
pub use metrics::{NodeMetrics, NodeMetricsSnapshot};
pub use session::{SessionRegistry, SessionState};

/// Tunables for one node. Defaults match the deployment profile; tests
/// shrink the durations.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub node_id: String,
    /// Session lease time-to-live; a crashed holder frees the user after
    /// this long without heartbeats.
    pub lease_ttl: Duration,
    /// Attempts at claiming a session before treating an envelope as
    /// someone else's.
    pub acquire_retries: u32,
    /// Read-modify-write attempts before a version conflict is surfaced as
    /// transient.
    pub mutation_retries: u32,
    /// Depth of each per-user command queue.
    pub command_queue_depth: usize,
    /// Cadence for republishing resident users' latest state. Disabled when
    /// unset.
    pub watchdog_interval: Option<Duration>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: format!("node-{}", Uuid::new_v4()),
            lease_ttl: Duration::from_secs(30),
            acquire_retries: 4,
            mutation_retries: 4,
            command_queue_depth: 256,
            watchdog_interval: None,
        }
    }
}

/// Shared dependencies handed to every session task. Lifecycle is owned by
/// the node's runtime: built at startup, dropped on shutdown, always passed
/// explicitly.
pub struct NodeContext<S, T> {
    pub config: NodeConfig,
    pub store: Arc<S>,
    pub transport: Arc<T>,
    pub audit: Option<Arc<AuditClient>>,
    pub metrics: Arc<NodeMetrics>,
}

impl<S: WalletStore, T: Transport> NodeContext<S, T> {
    pub fn new(config: NodeConfig, store: S, transport: T, audit: Option<AuditClient>) -> Self {
        Self {
            config,
            store: Arc::new(store),
            transport: Arc::new(transport),
            audit: audit.map(Arc::new),
            metrics: Arc::new(NodeMetrics::default()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }
}
