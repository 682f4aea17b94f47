//! Wallet domain types shared by every crate in the workspace.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which front-end originated a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxnSource {
    Discord,
    Game,
}

impl TxnSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnSource::Discord => "discord",
            TxnSource::Game => "game",
        }
    }
}

/// A request to change a user's balance. Constructed by front-ends, consumed
/// immutably by the nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCommand {
    pub txn_id: String,
    pub user_id: String,
    pub delta: i64,
    pub actor: String,
    pub source: TxnSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("txnId must be a non-empty string")]
    EmptyTxnId,
    #[error("userId must be a non-empty string")]
    EmptyUserId,
    #[error("delta must be a non-zero integer")]
    ZeroDelta,
}

impl TransactionCommand {
    /// Well-formedness check applied at every ingress point.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.txn_id.trim().is_empty() {
            return Err(ValidationError::EmptyTxnId);
        }
        if self.user_id.trim().is_empty() {
            return Err(ValidationError::EmptyUserId);
        }
        if self.delta == 0 {
            return Err(ValidationError::ZeroDelta);
        }
        Ok(())
    }
}

/// Outcome of the first successful apply of a command. Immutable thereafter:
/// a replay returns this record even if the replayed envelope's delta differs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedRecord {
    pub txn_id: String,
    pub delta: i64,
    pub balance_after: i64,
    pub actor: String,
    pub source: TxnSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub processed_at: i64,
}

/// Per-user state persisted under `wallet:{userId}`.
///
/// `balance` is the sum of every delta ever applied, not just those still in
/// `processed`; `processed` holds the most recent records oldest to newest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletProfile {
    pub balance: i64,
    #[serde(default)]
    pub processed: Vec<ProcessedRecord>,
}
