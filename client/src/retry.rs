//! Retry schedule for outbound HTTP requests.

use std::future::Future;
use std::time::Duration;

use reqwest::{header, Response, StatusCode};
use tracing::warn;

use crate::backoff::{sampled_backoff, DEFAULT_MAX_RETRIES};
use crate::Error;

/// Retries 429, 5xx, and network failures with exponential backoff and
/// jitter; a server-advertised `Retry-After` overrides the computed wait.
/// Other 4xx are permanent and surface immediately.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    pub async fn execute<F, Fut>(&self, mut request: F) -> crate::Result<Response>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = reqwest::Result<Response>>,
    {
        let attempts = self.max_retries.max(1);
        let mut attempt = 0;
        loop {
            let last = attempt + 1 >= attempts;
            match request().await {
                Ok(response) => {
                    let status = response.status();
                    if retryable_status(status) {
                        if last {
                            return Err(Error::Failed(status));
                        }
                        let wait = retry_after(&response).unwrap_or_else(|| sampled_backoff(attempt));
                        warn!(%status, attempt, wait_ms = wait.as_millis() as u64, "retrying request");
                        tokio::time::sleep(wait).await;
                    } else if status.is_client_error() {
                        return Err(Error::Failed(status));
                    } else {
                        return Ok(response);
                    }
                }
                Err(err) => {
                    if last {
                        return Err(err.into());
                    }
                    let wait = sampled_backoff(attempt);
                    warn!(error = %err, attempt, wait_ms = wait.as_millis() as u64, "retrying request");
                    tokio::time::sleep(wait).await;
                }
            }
            attempt += 1;
        }
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
