//! End-to-end tests against a live sink server.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

use walletbridge_types::canonical::to_canonical_json;
use walletbridge_types::{AuditIngestResponse, AuditRow, TxnSource, UpdateEvent};

use crate::{signature, Api, Sink};

const SECRET: &str = "test-webhook-secret";

struct TestContext {
    base_url: String,
    http: reqwest::Client,
    server_handle: tokio::task::JoinHandle<()>,
}

impl TestContext {
    async fn new() -> Self {
        let sink = Sink::new(Path::new(":memory:"), SECRET).unwrap();
        let api = Api::new(Arc::clone(&sink));
        let router = api.router();

        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        let actual_addr = listener.local_addr().unwrap();
        let base_url = format!("http://{actual_addr}");

        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url,
            http: reqwest::Client::new(),
            server_handle,
        }
    }

    fn event(&self, txn_id: &str, delta: i64) -> UpdateEvent {
        UpdateEvent {
            txn_id: txn_id.to_string(),
            user_id: "u-1".to_string(),
            delta,
            balance: delta,
            actor: "ops".to_string(),
            source: TxnSource::Discord,
            reason: Some("test".to_string()),
            occurred_at: "2024-05-01T12:00:00.000Z".to_string(),
        }
    }

    async fn post(
        &self,
        event: &UpdateEvent,
        key: Option<&str>,
        signature: Option<&str>,
    ) -> reqwest::Response {
        let mut request = self
            .http
            .post(format!("{}/log/transactions", self.base_url))
            .json(&json!({ "payload": event }));
        if let Some(key) = key {
            request = request.header("Idempotency-Key", key);
        }
        if let Some(signature) = signature {
            request = request.header("X-Signature", signature);
        }
        request.send().await.unwrap()
    }

    async fn post_signed(&self, event: &UpdateEvent, key: &str) -> reqwest::Response {
        let canonical = to_canonical_json(event).unwrap();
        let signature = signature::sign(SECRET, canonical.as_bytes());
        self.post(event, Some(key), Some(&signature)).await
    }

    async fn rows(&self, user_id: Option<&str>) -> Vec<AuditRow> {
        let mut request = self.http.get(format!("{}/log/transactions", self.base_url));
        if let Some(user_id) = user_id {
            request = request.query(&[("userId", user_id)]);
        }
        request.send().await.unwrap().json().await.unwrap()
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

#[tokio::test]
async fn accepts_and_persists_a_signed_delivery() {
    let ctx = TestContext::new().await;
    let event = ctx.event("t-1", 10);

    let response = ctx.post_signed(&event, "node-1-t-1").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: AuditIngestResponse = response.json().await.unwrap();
    assert!(body.accepted);
    assert_eq!(body.deduped, Some(false));

    let rows = ctx.rows(None).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].txn_id, "t-1");
    assert_eq!(rows[0].delta, 10);
}

#[tokio::test]
async fn retried_delivery_dedupes_to_one_row() {
    let ctx = TestContext::new().await;
    let event = ctx.event("t-1", 10);

    ctx.post_signed(&event, "node-1-t-1").await;
    let replay = ctx.post_signed(&event, "node-1-t-1").await;
    assert_eq!(replay.status(), StatusCode::OK);
    let body: AuditIngestResponse = replay.json().await.unwrap();
    assert_eq!(body.deduped, Some(true));

    assert_eq!(ctx.rows(None).await.len(), 1);
}

#[tokio::test]
async fn key_reuse_with_different_payload_conflicts() {
    let ctx = TestContext::new().await;
    ctx.post_signed(&ctx.event("t-1", 10), "shared-key").await;

    let conflicting = ctx.post_signed(&ctx.event("t-2", 99), "shared-key").await;
    assert_eq!(conflicting.status(), StatusCode::CONFLICT);
    let body: Value = conflicting.json().await.unwrap();
    assert_eq!(body["error"], "Idempotency key conflict");

    assert_eq!(ctx.rows(None).await.len(), 1);
}

#[tokio::test]
async fn missing_idempotency_key_is_rejected() {
    let ctx = TestContext::new().await;
    let event = ctx.event("t-1", 10);
    let canonical = to_canonical_json(&event).unwrap();
    let signature = signature::sign(SECRET, canonical.as_bytes());

    let response = ctx.post(&event, None, Some(&signature)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(ctx.rows(None).await.is_empty());
}

#[tokio::test]
async fn missing_signature_is_rejected() {
    let ctx = TestContext::new().await;
    let response = ctx.post(&ctx.event("t-1", 10), Some("k-1"), None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(ctx.rows(None).await.is_empty());
}

#[tokio::test]
async fn tampered_payload_fails_verification() {
    let ctx = TestContext::new().await;
    let event = ctx.event("t-1", 10);
    let canonical = to_canonical_json(&event).unwrap();
    let signature = signature::sign(SECRET, canonical.as_bytes());

    // Sign one payload, deliver another.
    let mut tampered = event.clone();
    tampered.delta = 10_000;
    let response = ctx.post(&tampered, Some("k-1"), Some(&signature)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(ctx.rows(None).await.is_empty());
}

#[tokio::test]
async fn signature_of_wrong_length_is_rejected_cleanly() {
    let ctx = TestContext::new().await;
    let response = ctx
        .post(&ctx.event("t-1", 10), Some("k-1"), Some("deadbeef"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn body_fields_substitute_for_headers() {
    let ctx = TestContext::new().await;
    let event = ctx.event("t-1", 10);
    let canonical = to_canonical_json(&event).unwrap();
    let signature = signature::sign(SECRET, canonical.as_bytes());

    let response = ctx
        .http
        .post(format!("{}/log/transactions", ctx.base_url))
        .json(&json!({
            "payload": event,
            "signature": signature,
            "idempotencyKey": "body-key-1",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(ctx.rows(None).await.len(), 1);
}

#[tokio::test]
async fn query_filters_by_user() {
    let ctx = TestContext::new().await;
    for (txn, user) in [("t-1", "u-1"), ("t-2", "u-2"), ("t-3", "u-1")] {
        let mut event = ctx.event(txn, 1);
        event.user_id = user.to_string();
        let response = ctx.post_signed(&event, &Uuid::new_v4().to_string()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let rows = ctx.rows(Some("u-1")).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].txn_id, "t-3");
    assert_eq!(rows[1].txn_id, "t-1");
}

#[tokio::test]
async fn health_reports_ok_with_timestamp() {
    let ctx = TestContext::new().await;
    let body: Value = ctx
        .http
        .get(format!("{}/health", ctx.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].as_str().unwrap().contains('T'));
}

#[tokio::test]
async fn metrics_render_counters() {
    let ctx = TestContext::new().await;
    ctx.post_signed(&ctx.event("t-1", 10), "k-1").await;
    let body = ctx
        .http
        .get(format!("{}/metrics", ctx.base_url))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("walletbridge_sink_requests_total 1"));
    assert!(body.contains("walletbridge_sink_accepted_total 1"));
}
