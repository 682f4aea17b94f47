use axum::{
    body::Bytes,
    extract::{Query, State as AxumState},
    http::HeaderMap,
    Json,
};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

use walletbridge_types::canonical::to_canonical_json;
use walletbridge_types::{AuditIngestRequest, AuditIngestResponse, AuditRow, HealthResponse};

use crate::error::SinkError;
use crate::signature;
use crate::store::IngestOutcome;
use crate::Sink;

const SIGNATURE_HEADER: &str = "x-signature";
const IDEMPOTENCY_HEADER: &str = "idempotency-key";

const DEFAULT_QUERY_LIMIT: u32 = 20;

pub(super) async fn ingest_transaction(
    AxumState(sink): AxumState<Arc<Sink>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AuditIngestResponse>, SinkError> {
    sink.metrics.record_request();

    let request: AuditIngestRequest =
        serde_json::from_slice(&body).map_err(|err| {
            debug!(error = %err, "rejecting malformed ingestion body");
            SinkError::MissingPayload
        })?;

    let key = extract_header(&headers, IDEMPOTENCY_HEADER)
        .or_else(|| request.idempotency_key.clone())
        .ok_or(SinkError::MissingKey)?;
    let submitted = extract_header(&headers, SIGNATURE_HEADER)
        .or_else(|| request.signature.clone())
        .ok_or(SinkError::MissingSignature)?;

    let canonical = to_canonical_json(&request.payload)
        .map_err(|err| SinkError::Internal(err.to_string()))?;
    if !signature::verify(&sink.secret, canonical.as_bytes(), &submitted) {
        sink.metrics.record_signature_failure();
        debug!(key = %key, "rejecting delivery with bad signature");
        return Err(SinkError::SignatureMismatch);
    }

    let payload_hash = hex::encode(Sha256::digest(canonical.as_bytes()));
    let payload = &request.payload;
    let row = AuditRow {
        txn_id: payload.txn_id.clone(),
        user_id: payload.user_id.clone(),
        delta: payload.delta,
        actor: payload.actor.clone(),
        source: payload.source,
        reason: payload.reason.clone(),
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };

    let store = sink.store.clone();
    let outcome = tokio::task::spawn_blocking(move || store.ingest(&key, &payload_hash, &row))
        .await
        .map_err(|err| SinkError::Internal(err.to_string()))?
        .map_err(|err| SinkError::Internal(err.to_string()))?;

    match outcome {
        IngestOutcome::Recorded => {
            sink.metrics.record_accepted();
            info!(
                txn_id = %payload.txn_id,
                user_id = %payload.user_id,
                delta = payload.delta,
                "audit row recorded"
            );
            Ok(Json(AuditIngestResponse {
                accepted: true,
                deduped: Some(false),
            }))
        }
        IngestOutcome::Deduped => {
            sink.metrics.record_deduped();
            debug!(txn_id = %payload.txn_id, "delivery deduplicated");
            Ok(Json(AuditIngestResponse {
                accepted: true,
                deduped: Some(true),
            }))
        }
        IngestOutcome::KeyConflict => {
            sink.metrics.record_key_conflict();
            Err(SinkError::KeyConflict)
        }
    }
}

#[derive(Deserialize)]
pub(super) struct LogQuery {
    #[serde(rename = "userId")]
    user_id: Option<String>,
    limit: Option<u32>,
}

pub(super) async fn query_transactions(
    AxumState(sink): AxumState<Arc<Sink>>,
    Query(query): Query<LogQuery>,
) -> Result<Json<Vec<AuditRow>>, SinkError> {
    let limit = query.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
    let store = sink.store.clone();
    let rows = tokio::task::spawn_blocking(move || store.query(query.user_id.as_deref(), limit))
        .await
        .map_err(|err| SinkError::Internal(err.to_string()))?
        .map_err(|err| SinkError::Internal(err.to_string()))?;
    Ok(Json(rows))
}

pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

pub(super) async fn metrics(AxumState(sink): AxumState<Arc<Sink>>) -> String {
    sink.metrics.render()
}

fn extract_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
