//! Client side of the audit webhook contract.
//!
//! Every newly inserted record is signed over its canonical JSON with the
//! shared secret and posted with a deterministic idempotency key, so sink
//! retries and node replays collapse into one audit row.

use std::time::Duration;

use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tracing::debug;

use walletbridge_types::canonical::to_canonical_json;
use walletbridge_types::{AuditIngestResponse, AuditRow, UpdateEvent};

use crate::retry::RetryPolicy;
use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Signature";
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Lowercase-hex HMAC-SHA-256 over `payload`.
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

pub struct AuditClient {
    http: reqwest::Client,
    base_url: String,
    secret: String,
    node_id: String,
    policy: RetryPolicy,
}

impl AuditClient {
    pub fn new(base_url: &str, secret: &str, node_id: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
            node_id: node_id.to_string(),
            policy: RetryPolicy::default(),
        })
    }

    /// POST one processed transaction to the sink.
    pub async fn post_transaction(&self, event: &UpdateEvent) -> Result<AuditIngestResponse> {
        let canonical = to_canonical_json(event)?;
        let signature = sign(&self.secret, canonical.as_bytes());
        let idempotency_key = format!("{}-{}", self.node_id, event.txn_id);
        let url = format!("{}/log/transactions", self.base_url);
        let body = json!({ "payload": event });

        let response = self
            .policy
            .execute(|| {
                self.http
                    .post(&url)
                    .header(SIGNATURE_HEADER, &signature)
                    .header(IDEMPOTENCY_HEADER, &idempotency_key)
                    .json(&body)
                    .send()
            })
            .await?;
        let accepted: AuditIngestResponse = response.json().await?;
        debug!(
            txn_id = %event.txn_id,
            deduped = ?accepted.deduped,
            "audit row delivered"
        );
        Ok(accepted)
    }
}

/// Query the sink's transaction log, newest first.
pub async fn fetch_log(
    http: &reqwest::Client,
    base_url: &str,
    user_id: Option<&str>,
    limit: u32,
) -> Result<Vec<AuditRow>> {
    let url = format!("{}/log/transactions", base_url.trim_end_matches('/'));
    let mut request = http.get(&url).query(&[("limit", limit.to_string())]);
    if let Some(user_id) = user_id {
        request = request.query(&[("userId", user_id)]);
    }
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(Error::Failed(response.status()));
    }
    Ok(response.json().await?)
}
