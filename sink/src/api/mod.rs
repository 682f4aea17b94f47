use axum::{
    extract::DefaultBodyLimit,
    routing::get,
    Router,
};
use std::sync::Arc;

use crate::Sink;

mod http;

/// Oversized ingestion bodies are refused before they reach a handler.
const MAX_BODY_SIZE: usize = 256 * 1024;

pub struct Api {
    sink: Arc<Sink>,
}

impl Api {
    pub fn new(sink: Arc<Sink>) -> Self {
        Self { sink }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(
                "/log/transactions",
                get(http::query_transactions).post(http::ingest_transaction),
            )
            .route("/health", get(http::health))
            .route("/metrics", get(http::metrics))
            .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
            .with_state(Arc::clone(&self.sink))
    }
}
