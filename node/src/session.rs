//! Per-user session ownership and serialized command processing.
//!
//! Each active user gets one task fed by one queue, so commands for the
//! same user are strictly FIFO on a node while distinct users proceed in
//! parallel. Across nodes, exclusion comes solely from the store's lease:
//! the holder mutates, everyone else drops the envelope.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use walletbridge_client::backoff::sampled_backoff;
use walletbridge_client::{StoreError, Transport, WalletStore};
use walletbridge_ledger::{ProcessedRing, RING_CAPACITY};
use walletbridge_types::TransactionCommand;

use crate::{emitter, mutator, NodeContext};

/// Ownership of one user on one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    LoadRequested,
    Owned,
    NotOwner,
    Released,
    LostLease,
}

enum SessionRequest {
    Command(TransactionCommand),
    Join,
    Leave,
    LeaseLost,
}

/// Explicit map of live sessions keyed by user id. Session tasks remove
/// their own entry on termination.
pub struct SessionRegistry<S, T> {
    ctx: Arc<NodeContext<S, T>>,
    entries: Arc<Mutex<HashMap<String, mpsc::Sender<SessionRequest>>>>,
    residents: Arc<Mutex<HashSet<String>>>,
}

impl<S, T> Clone for SessionRegistry<S, T> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            entries: Arc::clone(&self.entries),
            residents: Arc::clone(&self.residents),
        }
    }
}

impl<S: WalletStore, T: Transport> SessionRegistry<S, T> {
    pub fn new(ctx: Arc<NodeContext<S, T>>) -> Self {
        Self {
            ctx,
            entries: Arc::new(Mutex::new(HashMap::new())),
            residents: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Route a validated command into the user's queue. Never blocks the
    /// caller: a saturated queue drops the envelope (the transport is
    /// at-least-once).
    pub fn submit_command(&self, command: TransactionCommand) {
        self.ctx.metrics.record_received();
        let sender = self.session_sender(&command.user_id);
        let user_id = command.user_id.clone();
        if sender
            .try_send(SessionRequest::Command(command))
            .is_err()
        {
            self.ctx.metrics.record_dropped();
            warn!(user_id = %user_id, "session queue saturated; dropping envelope");
        }
    }

    /// Player-session begin signal from the embedding game server.
    pub fn player_joined(&self, user_id: &str) {
        let sender = self.session_sender(user_id);
        if sender.try_send(SessionRequest::Join).is_err() {
            warn!(user_id, "session queue saturated; join signal dropped");
        }
    }

    /// Player-session end signal from the embedding game server.
    pub fn player_left(&self, user_id: &str) {
        let sender = {
            let entries = self.entries.lock().unwrap();
            entries.get(user_id).cloned()
        };
        if let Some(sender) = sender {
            let _ = sender.try_send(SessionRequest::Leave);
        }
    }

    pub fn resident_users(&self) -> Vec<String> {
        self.residents.lock().unwrap().iter().cloned().collect()
    }

    pub fn metrics(&self) -> &crate::NodeMetrics {
        &self.ctx.metrics
    }

    /// Ask every live session to release and wait for the map to drain.
    pub async fn shutdown(&self) {
        let senders: Vec<_> = {
            let entries = self.entries.lock().unwrap();
            entries.values().cloned().collect()
        };
        for sender in senders {
            let _ = sender.try_send(SessionRequest::Leave);
        }
        for _ in 0..40 {
            if self.entries.lock().unwrap().is_empty() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        warn!("sessions still live after shutdown grace period");
    }

    fn session_sender(&self, user_id: &str) -> mpsc::Sender<SessionRequest> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(sender) = entries.get(user_id) {
            if !sender.is_closed() {
                return sender.clone();
            }
        }
        let (tx, rx) = mpsc::channel(self.ctx.config.command_queue_depth);
        entries.insert(user_id.to_string(), tx.clone());

        let task = SessionTask {
            ctx: Arc::clone(&self.ctx),
            user_id: user_id.to_string(),
            state: SessionState::Idle,
            resident: false,
            mirror: None,
            heartbeat: None,
        };
        tokio::spawn(task.run(
            rx,
            tx.clone(),
            Arc::clone(&self.entries),
            Arc::clone(&self.residents),
        ));
        tx
    }
}

struct SessionTask<S, T> {
    ctx: Arc<NodeContext<S, T>>,
    user_id: String,
    state: SessionState,
    resident: bool,
    /// Ring mirrored from the last successful store round-trip, held only
    /// while this node owns the session.
    mirror: Option<ProcessedRing>,
    heartbeat: Option<JoinHandle<()>>,
}

impl<S: WalletStore, T: Transport> SessionTask<S, T> {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<SessionRequest>,
        tx: mpsc::Sender<SessionRequest>,
        entries: Arc<Mutex<HashMap<String, mpsc::Sender<SessionRequest>>>>,
        residents: Arc<Mutex<HashSet<String>>>,
    ) {
        while let Some(request) = rx.recv().await {
            match request {
                SessionRequest::Command(command) => self.handle_command(command, &tx).await,
                SessionRequest::Join => self.handle_join(&tx, &residents).await,
                SessionRequest::Leave => {
                    self.handle_leave(&residents).await;
                    break;
                }
                SessionRequest::LeaseLost => {
                    if !self.handle_lease_lost() {
                        break;
                    }
                }
            }
        }

        if self.state == SessionState::Owned {
            self.release().await;
        }
        self.stop_heartbeat();
        residents.lock().unwrap().remove(&self.user_id);
        entries.lock().unwrap().remove(&self.user_id);
        debug!(user_id = %self.user_id, "session ended");
    }

    async fn handle_join(
        &mut self,
        tx: &mpsc::Sender<SessionRequest>,
        residents: &Arc<Mutex<HashSet<String>>>,
    ) {
        self.resident = true;
        residents.lock().unwrap().insert(self.user_id.clone());
        if self.state != SessionState::Owned {
            self.ensure_owned(tx).await;
        }
    }

    async fn handle_leave(&mut self, residents: &Arc<Mutex<HashSet<String>>>) {
        residents.lock().unwrap().remove(&self.user_id);
        self.resident = false;
        if self.state == SessionState::Owned {
            self.release().await;
        }
    }

    /// Returns false when the task has no reason to stay alive.
    fn handle_lease_lost(&mut self) -> bool {
        self.ctx.metrics.record_lease_lost();
        warn!(user_id = %self.user_id, "session lease lost; treating as released");
        self.stop_heartbeat();
        self.mirror = None;
        self.state = SessionState::LostLease;
        self.resident
    }

    async fn handle_command(
        &mut self,
        command: TransactionCommand,
        tx: &mpsc::Sender<SessionRequest>,
    ) {
        let opportunistic = !self.resident;

        if self.state != SessionState::Owned && !self.ensure_owned(tx).await {
            self.ctx.metrics.record_not_owner();
            debug!(
                user_id = %self.user_id,
                txn_id = %command.txn_id,
                "not the session owner; ignoring envelope"
            );
            return;
        }

        // The mirror spares a store round-trip on replays that are still in
        // the window.
        if let Some(ring) = &self.mirror {
            if ring.get(&command.txn_id).is_some() {
                self.ctx.metrics.record_deduped();
                debug!(
                    user_id = %self.user_id,
                    txn_id = %command.txn_id,
                    "replay deduplicated in memory"
                );
                if opportunistic {
                    self.release().await;
                }
                return;
            }
        }

        match mutator::apply_command(
            self.ctx.store.as_ref(),
            &command,
            self.ctx.config.mutation_retries,
        )
        .await
        {
            Ok(result) => {
                if self.resident {
                    self.mirror = build_mirror(&result.profile);
                }
                if result.outcome.inserted {
                    self.ctx.metrics.record_applied();
                    info!(
                        user_id = %self.user_id,
                        txn_id = %command.txn_id,
                        delta = command.delta,
                        balance = result.outcome.balance,
                        "transaction applied"
                    );
                    let event = emitter::update_event(&self.user_id, &result.outcome.record);
                    emitter::broadcast(
                        self.ctx.transport.as_ref(),
                        &self.ctx.metrics,
                        &event,
                    )
                    .await;
                    if let Some(audit) = &self.ctx.audit {
                        if let Err(err) = audit.post_transaction(&event).await {
                            self.ctx.metrics.record_audit_failure();
                            warn!(
                                txn_id = %command.txn_id,
                                error = %err,
                                "audit post failed; ledger remains authoritative"
                            );
                        }
                    }
                } else {
                    self.ctx.metrics.record_deduped();
                    debug!(
                        user_id = %self.user_id,
                        txn_id = %command.txn_id,
                        "replay deduplicated against stored profile"
                    );
                }
            }
            Err(err) => {
                self.ctx.metrics.record_store_failure();
                warn!(
                    user_id = %self.user_id,
                    txn_id = %command.txn_id,
                    error = %err,
                    "mutation failed; envelope dropped for this node"
                );
            }
        }

        if opportunistic {
            self.release().await;
        }
    }

    /// Claim the session, with bounded retries. Leaves the state at `Owned`
    /// or `NotOwner`.
    async fn ensure_owned(&mut self, tx: &mpsc::Sender<SessionRequest>) -> bool {
        self.state = SessionState::LoadRequested;
        let attempts = self.ctx.config.acquire_retries.max(1);
        for attempt in 0..attempts {
            match self
                .ctx
                .store
                .acquire_session(
                    &self.user_id,
                    self.ctx.node_id(),
                    self.ctx.config.lease_ttl,
                )
                .await
            {
                Ok(true) => {
                    self.state = SessionState::Owned;
                    if self.resident {
                        self.load_mirror().await;
                        self.start_heartbeat(tx.clone());
                    }
                    return true;
                }
                Ok(false) if attempt + 1 < attempts => {
                    // The holder may be mid-release; give it a moment.
                    tokio::time::sleep(sampled_backoff(attempt)).await;
                }
                Ok(false) => break,
                Err(StoreError::Transient(reason)) if attempt + 1 < attempts => {
                    debug!(
                        user_id = %self.user_id,
                        attempt,
                        reason = %reason,
                        "lease acquisition retry"
                    );
                    tokio::time::sleep(sampled_backoff(attempt)).await;
                }
                Err(err) => {
                    warn!(user_id = %self.user_id, error = %err, "lease acquisition failed");
                    break;
                }
            }
        }
        self.state = SessionState::NotOwner;
        false
    }

    async fn load_mirror(&mut self) {
        match self.ctx.store.read_profile(&self.user_id).await {
            Ok(versioned) => {
                let profile = versioned.profile.unwrap_or_default();
                self.mirror = build_mirror(&profile);
            }
            Err(err) => {
                // The mirror is an optimization; the mutator re-reads anyway.
                debug!(user_id = %self.user_id, error = %err, "profile preload failed");
                self.mirror = None;
            }
        }
    }

    fn start_heartbeat(&mut self, tx: mpsc::Sender<SessionRequest>) {
        self.stop_heartbeat();
        let store = Arc::clone(&self.ctx.store);
        let user_id = self.user_id.clone();
        let node_id = self.ctx.node_id().to_string();
        let ttl = self.ctx.config.lease_ttl;
        self.heartbeat = Some(tokio::spawn(async move {
            let interval = ttl / 3;
            loop {
                tokio::time::sleep(interval).await;
                match store.renew_session(&user_id, &node_id, ttl).await {
                    Ok(true) => {}
                    Ok(false) => {
                        let _ = tx.send(SessionRequest::LeaseLost).await;
                        return;
                    }
                    Err(err) => {
                        // Transient heartbeat misses are survivable until
                        // the lease actually expires.
                        warn!(user_id = %user_id, error = %err, "lease renewal failed");
                    }
                }
            }
        }));
    }

    fn stop_heartbeat(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }

    async fn release(&mut self) {
        self.stop_heartbeat();
        self.mirror = None;
        if let Err(err) = self
            .ctx
            .store
            .release_session(&self.user_id, self.ctx.node_id())
            .await
        {
            warn!(user_id = %self.user_id, error = %err, "session release failed");
        }
        self.state = SessionState::Released;
    }
}

fn build_mirror(profile: &walletbridge_types::WalletProfile) -> Option<ProcessedRing> {
    ProcessedRing::with_records(RING_CAPACITY, profile.processed.iter().cloned()).ok()
}
