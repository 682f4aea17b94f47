//! Typed publish/subscribe over the fabric's pub/sub channels.
//!
//! Every published unit is a frame carrying the canonical envelope body
//! `{"message": <payload>}` plus a `content-md5` transport header computed
//! over that body. Subscribers verify the hash and drop mismatches, so a
//! corrupted frame never reaches a dispatcher.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use walletbridge_types::canonical::to_canonical_json;

use crate::backoff::{sampled_backoff, DEFAULT_MAX_RETRIES};

const CONTENT_MD5_HEADER: &str = "content-md5";
const SUBSCRIPTION_BUFFER: usize = 1_024;
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("publish retries exhausted for topic {0}")]
    RetriesExhausted(String),
}

/// Messages delivered for one topic. Delivery is at-least-once; the
/// subscription survives fabric reconnects.
pub struct Subscription {
    rx: mpsc::Receiver<String>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Next verified payload, or `None` once the transport is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

pub trait Transport: Send + Sync + 'static {
    fn publish(
        &self,
        topic: &str,
        payload: String,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn subscribe(
        &self,
        topic: &str,
    ) -> impl Future<Output = Result<Subscription, TransportError>> + Send;
}

#[derive(Serialize, Deserialize)]
struct TransportFrame {
    headers: BTreeMap<String, String>,
    body: String,
}

#[derive(Serialize, Deserialize)]
struct EnvelopeBody {
    message: String,
}

/// Wrap `payload` in the integrity-hashed wire frame.
pub fn encode_frame(payload: &str) -> Result<String, serde_json::Error> {
    let body = to_canonical_json(&EnvelopeBody {
        message: payload.to_string(),
    })?;
    let digest = md5::compute(body.as_bytes());
    let mut headers = BTreeMap::new();
    headers.insert(
        CONTENT_MD5_HEADER.to_string(),
        general_purpose::STANDARD.encode(digest.0),
    );
    serde_json::to_string(&TransportFrame { headers, body })
}

/// Unwrap a wire frame, returning the payload only when the content hash
/// checks out.
pub fn decode_frame(raw: &str) -> Option<String> {
    let frame: TransportFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(error = %err, "dropping undecodable transport frame");
            return None;
        }
    };
    let Some(submitted) = frame.headers.get(CONTENT_MD5_HEADER) else {
        warn!("dropping transport frame without content hash");
        return None;
    };
    let digest = md5::compute(frame.body.as_bytes());
    if general_purpose::STANDARD.encode(digest.0) != *submitted {
        warn!("dropping transport frame with content hash mismatch");
        return None;
    }
    match serde_json::from_str::<EnvelopeBody>(&frame.body) {
        Ok(body) => Some(body.message),
        Err(err) => {
            warn!(error = %err, "dropping transport frame with malformed body");
            None
        }
    }
}

/// Pub/sub transport backed by the redis fabric.
pub struct RedisTransport {
    client: redis::Client,
    publisher: tokio::sync::Mutex<Option<redis::aio::ConnectionManager>>,
    max_retries: u32,
}

impl RedisTransport {
    pub fn new(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            publisher: tokio::sync::Mutex::new(None),
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    async fn try_publish(&self, topic: &str, frame: &str) -> Result<(), TransportError> {
        let mut guard = self.publisher.lock().await;
        if guard.is_none() {
            *guard = Some(self.client.get_connection_manager().await?);
        }
        let conn = guard
            .as_mut()
            .unwrap_or_else(|| unreachable!("publisher connection just established"));
        let result: redis::RedisResult<()> = redis::cmd("PUBLISH")
            .arg(topic)
            .arg(frame)
            .query_async(conn)
            .await;
        if let Err(err) = result {
            *guard = None;
            return Err(err.into());
        }
        Ok(())
    }
}

impl Transport for RedisTransport {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), TransportError> {
        let frame = encode_frame(&payload)?;
        let attempts = self.max_retries.max(1);
        let mut attempt = 0;
        loop {
            match self.try_publish(topic, &frame).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    attempt += 1;
                    if attempt >= attempts {
                        warn!(topic, error = %err, "publish retries exhausted");
                        return Err(TransportError::RetriesExhausted(topic.to_string()));
                    }
                    let delay = sampled_backoff(attempt - 1);
                    warn!(topic, error = %err, attempt, "publish failed; backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let client = self.client.clone();
        let topic = topic.to_string();
        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                match run_subscriber(&client, &topic, &tx).await {
                    Ok(()) => return,
                    Err(err) => {
                        warn!(topic = %topic, error = %err, "subscriber connection lost");
                    }
                }
                let delay = sampled_backoff(attempt).min(MAX_RECONNECT_DELAY);
                attempt = attempt.saturating_add(1);
                tokio::time::sleep(delay).await;
            }
        });
        Ok(Subscription::new(rx))
    }
}

async fn run_subscriber(
    client: &redis::Client,
    topic: &str,
    tx: &mpsc::Sender<String>,
) -> Result<(), redis::RedisError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(topic).await?;
    debug!(topic, "subscribed");
    let mut stream = pubsub.on_message();
    while let Some(message) = stream.next().await {
        let raw: String = match message.get_payload() {
            Ok(raw) => raw,
            Err(err) => {
                warn!(topic, error = %err, "message payload decode failed");
                continue;
            }
        };
        let Some(payload) = decode_frame(&raw) else {
            continue;
        };
        if tx.send(payload).await.is_err() {
            // Receiver dropped; end the subscription quietly.
            return Ok(());
        }
    }
    Err(redis::RedisError::from(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "pubsub stream ended",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips() {
        let payload = r#"{"type":"economy.command","payload":{}}"#;
        let frame = encode_frame(payload).unwrap();
        assert_eq!(decode_frame(&frame).unwrap(), payload);
    }

    #[test]
    fn tampered_body_is_dropped() {
        let frame = encode_frame("original payload").unwrap();
        let tampered = frame.replace("original", "replaced");
        assert!(decode_frame(&tampered).is_none());
    }

    #[test]
    fn missing_hash_header_is_dropped() {
        let body = to_canonical_json(&EnvelopeBody {
            message: "payload".to_string(),
        })
        .unwrap();
        let frame = serde_json::to_string(&TransportFrame {
            headers: BTreeMap::new(),
            body,
        })
        .unwrap();
        assert!(decode_frame(&frame).is_none());
    }

    #[test]
    fn garbage_is_dropped() {
        assert!(decode_frame("not json at all").is_none());
    }
}
