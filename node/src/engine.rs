//! Top-level runtime for one game node.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use walletbridge_client::{AuditClient, Transport, TransportError, WalletStore};
use walletbridge_types::COMMANDS_TOPIC;

use crate::session::SessionRegistry;
use crate::{dispatcher, emitter, metrics::NodeMetrics, NodeConfig, NodeContext};

/// Owns the command subscription and the session registry. The embedding
/// game server forwards player lifecycle signals through
/// [`Engine::player_joined`] / [`Engine::player_left`]; a headless node just
/// runs the subscription and processes commands opportunistically.
pub struct Engine<S, T> {
    ctx: Arc<NodeContext<S, T>>,
    registry: SessionRegistry<S, T>,
}

impl<S: WalletStore, T: Transport> Engine<S, T> {
    pub fn new(config: NodeConfig, store: S, transport: T, audit: Option<AuditClient>) -> Self {
        let ctx = Arc::new(NodeContext::new(config, store, transport, audit));
        let registry = SessionRegistry::new(Arc::clone(&ctx));
        Self { ctx, registry }
    }

    pub fn metrics(&self) -> Arc<NodeMetrics> {
        Arc::clone(&self.ctx.metrics)
    }

    pub fn registry(&self) -> &SessionRegistry<S, T> {
        &self.registry
    }

    pub fn player_joined(&self, user_id: &str) {
        self.registry.player_joined(user_id);
    }

    pub fn player_left(&self, user_id: &str) {
        self.registry.player_left(user_id);
    }

    /// Consume the command topic until the transport goes away. The
    /// subscription reconnects internally, so returning is terminal.
    pub async fn run(&self) -> Result<(), TransportError> {
        if let Some(interval) = self.ctx.config.watchdog_interval {
            self.spawn_watchdog(interval);
        }

        let mut subscription = self.ctx.transport.subscribe(COMMANDS_TOPIC).await?;
        info!(node_id = %self.ctx.node_id(), "command subscription active");
        while let Some(raw) = subscription.recv().await {
            dispatcher::handle_message(&self.registry, &raw);
        }
        warn!("command subscription closed");
        Ok(())
    }

    /// Release every held session, logging final counters.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
        info!(
            node_id = %self.ctx.node_id(),
            metrics = ?self.ctx.metrics.snapshot(),
            "node stopped"
        );
    }

    fn spawn_watchdog(&self, interval: Duration) {
        let ctx = Arc::clone(&self.ctx);
        let registry = self.registry.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                for user_id in registry.resident_users() {
                    match ctx.store.read_profile(&user_id).await {
                        Ok(versioned) => {
                            let Some(profile) = versioned.profile else {
                                continue;
                            };
                            let event = emitter::refresh_event(&user_id, profile.balance);
                            emitter::broadcast(ctx.transport.as_ref(), &ctx.metrics, &event)
                                .await;
                        }
                        Err(err) => {
                            debug!(user_id = %user_id, error = %err, "watchdog read failed");
                        }
                    }
                }
            }
        });
    }
}
