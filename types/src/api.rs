//! Wire envelopes and HTTP request/response bodies.

use serde::{Deserialize, Serialize};

use crate::wallet::{TransactionCommand, TxnSource};

/// Envelope routed over the messaging fabric, tagged by `type`.
///
/// Every subscriber receives every envelope on a topic; unknown types fail to
/// decode and are dropped at ingress.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Envelope {
    #[serde(rename = "economy.command")]
    Command(TransactionCommand),
    #[serde(rename = "economy.update")]
    Update(UpdateEvent),
}

/// Broadcast after a successful mutation, and the payload the audit sink
/// ingests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvent {
    pub txn_id: String,
    pub user_id: String,
    pub delta: i64,
    pub balance: i64,
    pub actor: String,
    pub source: TxnSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// ISO-8601 instant of the apply.
    pub occurred_at: String,
}

/// Body of `POST /log/transactions`. The signature and idempotency key may
/// ride in the body when a caller cannot set headers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditIngestRequest {
    pub payload: UpdateEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditIngestResponse {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deduped: Option<bool>,
}

/// Row returned by `GET /log/transactions`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRow {
    pub txn_id: String,
    pub user_id: String,
    pub delta: i64,
    pub actor: String,
    pub source: TxnSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}
