pub mod audit;
pub mod backoff;
pub mod confirm;
pub mod mocks;
pub mod retry;
pub mod store;
pub mod transport;

pub use audit::AuditClient;
pub use confirm::{await_confirmation, Confirmation};
pub use retry::RetryPolicy;
pub use store::{RedisStore, StoreError, VersionedProfile, WalletStore};
pub use transport::{RedisTransport, Subscription, Transport, TransportError};

use thiserror::Error;

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("invalid data: {0}")]
    InvalidData(#[from] serde_json::Error),
    #[error("failed: {0}")]
    Failed(reqwest::StatusCode),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
