use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the ingestion endpoint, mapped onto the webhook
/// contract's status codes.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The body is not a well-formed ingestion request.
    #[error("missing or malformed payload")]
    MissingPayload,

    /// No `Idempotency-Key` header or body field.
    #[error("missing idempotency key")]
    MissingKey,

    /// No `X-Signature` header or body field.
    #[error("missing signature")]
    MissingSignature,

    /// The submitted signature does not match the canonical payload.
    #[error("invalid signature")]
    SignatureMismatch,

    /// The idempotency key was seen before with a different payload.
    #[error("Idempotency key conflict")]
    KeyConflict,

    #[error("internal error: {0}")]
    Internal(String),
}

impl SinkError {
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingPayload | Self::MissingKey => StatusCode::BAD_REQUEST,
            Self::MissingSignature | Self::SignatureMismatch => StatusCode::UNAUTHORIZED,
            Self::KeyConflict => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SinkError {
    fn into_response(self) -> Response {
        if let Self::Internal(reason) = &self {
            // Log the detail, never leak it to the caller.
            tracing::error!(reason = %reason, "audit ingestion failed");
            return (
                self.status_code(),
                Json(json!({ "error": "Internal error" })),
            )
                .into_response();
        }
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
