//! Update broadcasts to the per-user event topics.
//!
//! The ledger is already durable by the time anything here runs, so a
//! failed publish is a warning and the next reader simply observes the new
//! balance from the store.

use chrono::{SecondsFormat, Utc};
use tracing::warn;
use uuid::Uuid;

use walletbridge_client::Transport;
use walletbridge_types::{events_topic, Envelope, ProcessedRecord, TxnSource, UpdateEvent};

use crate::metrics::NodeMetrics;

pub fn update_event(user_id: &str, record: &ProcessedRecord) -> UpdateEvent {
    UpdateEvent {
        txn_id: record.txn_id.clone(),
        user_id: user_id.to_string(),
        delta: record.delta,
        balance: record.balance_after,
        actor: record.actor.clone(),
        source: record.source,
        reason: record.reason.clone(),
        occurred_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }
}

/// Zero-delta refresh of the latest known state, published by the watchdog.
pub fn refresh_event(user_id: &str, balance: i64) -> UpdateEvent {
    UpdateEvent {
        txn_id: format!("refresh-{}", Uuid::new_v4()),
        user_id: user_id.to_string(),
        delta: 0,
        balance,
        actor: "watchdog".to_string(),
        source: TxnSource::Game,
        reason: None,
        occurred_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }
}

pub async fn broadcast<T: Transport>(transport: &T, metrics: &NodeMetrics, event: &UpdateEvent) {
    let payload = match serde_json::to_string(&Envelope::Update(event.clone())) {
        Ok(payload) => payload,
        Err(err) => {
            metrics.record_broadcast_failure();
            warn!(txn_id = %event.txn_id, error = %err, "update encode failed");
            return;
        }
    };
    if let Err(err) = transport
        .publish(&events_topic(&event.user_id), payload)
        .await
    {
        metrics.record_broadcast_failure();
        warn!(
            user_id = %event.user_id,
            txn_id = %event.txn_id,
            error = %err,
            "update broadcast failed"
        );
    }
}
