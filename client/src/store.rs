//! Versioned wallet store client and the per-user session lease.
//!
//! The fabric only offers optimistic concurrency: reads return a version
//! token and conditional writes fail on mismatch. The session lease is the
//! store's mutual-exclusion primitive: an expiring key held by exactly one
//! node and renewed by heartbeat.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;
use walletbridge_types::{session_key, wallet_key, WalletProfile};

#[derive(Error, Debug)]
pub enum StoreError {
    /// The entry changed under us; retry the read-modify-write locally.
    #[error("version conflict")]
    VersionConflict,
    /// Worth retrying with backoff (connection loss, timeouts, overload).
    #[error("transient store failure: {0}")]
    Transient(String),
    /// Not retryable (corrupt data, misuse, fatal server response).
    #[error("permanent store failure: {0}")]
    Permanent(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_timeout() || err.is_connection_dropped() || err.is_cluster_error()
        {
            StoreError::Transient(err.to_string())
        } else {
            StoreError::Permanent(err.to_string())
        }
    }
}

/// A profile read alongside its version token. Missing entries are
/// `{profile: None, version: None}`, never an error.
#[derive(Clone, Debug, Default)]
pub struct VersionedProfile {
    pub profile: Option<WalletProfile>,
    pub version: Option<u64>,
}

pub trait WalletStore: Send + Sync + 'static {
    fn read_profile(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<VersionedProfile, StoreError>> + Send;

    /// Write `profile` if the stored version still equals `expect`
    /// (`None` = the entry must not exist yet). Returns the new version.
    fn write_profile(
        &self,
        user_id: &str,
        profile: &WalletProfile,
        expect: Option<u64>,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Claim the user's session for `node_id`. False when another node
    /// holds a live lease.
    fn acquire_session(
        &self,
        user_id: &str,
        node_id: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Extend a held lease. False when the lease is no longer ours.
    fn renew_session(
        &self,
        user_id: &str,
        node_id: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn release_session(
        &self,
        user_id: &str,
        node_id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

// Compare-and-set over a hash holding the profile JSON and its version.
// Returns the new version, or -1 on mismatch.
const WRITE_SCRIPT: &str = r#"
local cur = redis.call('HGET', KEYS[1], 'version')
if ARGV[2] == '' then
  if cur then return -1 end
else
  if not cur or cur ~= ARGV[2] then return -1 end
end
local next
if cur then next = tonumber(cur) + 1 else next = 1 end
redis.call('HSET', KEYS[1], 'data', ARGV[1], 'version', tostring(next))
return next
"#;

// Renew only while we still hold the lease.
const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
  return 1
end
return 0
"#;

// Release only our own lease; a newer holder's claim must survive.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Wallet store backed by the redis fabric.
pub struct RedisStore {
    client: redis::Client,
    connection: tokio::sync::Mutex<Option<redis::aio::ConnectionManager>>,
    write_script: redis::Script,
    renew_script: redis::Script,
    release_script: redis::Script,
}

impl RedisStore {
    pub fn new(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            connection: tokio::sync::Mutex::new(None),
            write_script: redis::Script::new(WRITE_SCRIPT),
            renew_script: redis::Script::new(RENEW_SCRIPT),
            release_script: redis::Script::new(RELEASE_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<redis::aio::ConnectionManager, StoreError> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.client.get_connection_manager().await?);
        }
        Ok(guard
            .as_ref()
            .unwrap_or_else(|| unreachable!("connection just established"))
            .clone())
    }
}

impl WalletStore for RedisStore {
    async fn read_profile(&self, user_id: &str) -> Result<VersionedProfile, StoreError> {
        let mut conn = self.connection().await?;
        let (data, version): (Option<String>, Option<u64>) = redis::cmd("HMGET")
            .arg(wallet_key(user_id))
            .arg("data")
            .arg("version")
            .query_async(&mut conn)
            .await?;
        let profile = match data {
            Some(raw) => Some(
                serde_json::from_str(&raw)
                    .map_err(|err| StoreError::Permanent(format!("corrupt profile: {err}")))?,
            ),
            None => None,
        };
        Ok(VersionedProfile { profile, version })
    }

    async fn write_profile(
        &self,
        user_id: &str,
        profile: &WalletProfile,
        expect: Option<u64>,
    ) -> Result<u64, StoreError> {
        let data = serde_json::to_string(profile)
            .map_err(|err| StoreError::Permanent(format!("encode profile: {err}")))?;
        let expect = expect.map(|v| v.to_string()).unwrap_or_default();
        let mut conn = self.connection().await?;
        let result: i64 = self
            .write_script
            .key(wallet_key(user_id))
            .arg(data)
            .arg(expect)
            .invoke_async(&mut conn)
            .await?;
        if result < 0 {
            debug!(user_id, "conditional write lost the race");
            return Err(StoreError::VersionConflict);
        }
        Ok(result as u64)
    }

    async fn acquire_session(
        &self,
        user_id: &str,
        node_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let claimed: Option<String> = redis::cmd("SET")
            .arg(session_key(user_id))
            .arg(node_id)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        if claimed.is_some() {
            return Ok(true);
        }
        // Re-acquiring our own live lease counts as ownership.
        self.renew_session(user_id, node_id, ttl).await
    }

    async fn renew_session(
        &self,
        user_id: &str,
        node_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let renewed: i64 = self
            .renew_script
            .key(session_key(user_id))
            .arg(node_id)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed == 1)
    }

    async fn release_session(&self, user_id: &str, node_id: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: i64 = self
            .release_script
            .key(session_key(user_id))
            .arg(node_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}
