pub mod api;
pub mod canonical;
pub mod wallet;

pub use api::{
    AuditIngestRequest, AuditIngestResponse, AuditRow, Envelope, HealthResponse, UpdateEvent,
};
pub use wallet::{ProcessedRecord, TransactionCommand, TxnSource, ValidationError, WalletProfile};

/// Key under which a user's wallet profile is stored in the fabric.
pub fn wallet_key(user_id: &str) -> String {
    format!("wallet:{user_id}")
}

/// Key under which a user's session lease is held in the fabric.
pub fn session_key(user_id: &str) -> String {
    format!("session:{user_id}")
}

/// Global topic carrying administrative commands to every node.
pub const COMMANDS_TOPIC: &str = "commands";

/// Per-user topic carrying update broadcasts.
pub fn events_topic(user_id: &str) -> String {
    format!("events:{user_id}")
}
