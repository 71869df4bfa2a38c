//! Retry logic.
//!
//! # Responsibilities
//! - Determine if a request is retryable (idempotent methods only)
//! - Replay the request with exponential backoff + jitter
//!
//! # Design Decisions
//! - Never retry POST/PATCH or upgrade requests
//! - Only bodies with a declared length within the replay cap are buffered;
//!   anything else is forwarded once, unbuffered
//! - Connection errors always retryable; 502/503/504 retried while attempts
//!   remain

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, UPGRADE};
use axum::http::{Method, Request, Response, StatusCode};
use bytes::Bytes;
use http_body_util::{BodyExt, Limited};
use hyper::body::Body as _;
use std::sync::Arc;

use crate::config::RetryConfig;
use crate::error::BoxError;
use crate::middleware::{decorator, Decorator};
use crate::proxy::Transport;
use crate::resilience::backoff::Backoff;

/// Whether an attempt that ended this way may be repeated.
pub fn is_retryable(method: &Method, status: Option<StatusCode>, network_error: bool) -> bool {
    if !method.is_idempotent() {
        return false;
    }
    if network_error {
        return true;
    }
    matches!(
        status,
        Some(StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT)
    )
}

/// Transport decorator replaying failed idempotent requests.
pub struct Retry {
    inner: Arc<dyn Transport>,
    config: RetryConfig,
    backoff: Backoff,
}

impl Retry {
    pub fn new(inner: Arc<dyn Transport>, config: RetryConfig) -> Self {
        let backoff = Backoff::from_config(&config);
        Self {
            inner,
            config,
            backoff,
        }
    }

    /// Body length if the request may be buffered for replay.
    fn replay_len(&self, request: &Request<Body>) -> Option<u64> {
        if !request.method().is_idempotent() || request.headers().contains_key(UPGRADE) {
            return None;
        }
        let declared = match request.headers().get(CONTENT_LENGTH) {
            Some(value) => value.to_str().ok()?.trim().parse::<u64>().ok()?,
            None => request.body().size_hint().exact()?,
        };
        (declared <= self.config.max_replay_body_bytes).then_some(declared)
    }
}

#[async_trait]
impl Transport for Retry {
    async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>, BoxError> {
        let max_attempts = self.config.max_attempts.max(1);
        if max_attempts == 1 || self.replay_len(&request).is_none() {
            return self.inner.round_trip(request).await;
        }

        let (parts, body) = request.into_parts();
        let limit = usize::try_from(self.config.max_replay_body_bytes).unwrap_or(usize::MAX);
        let bytes: Bytes = Limited::new(body, limit).collect().await?.to_bytes();

        let mut attempt = 1;
        loop {
            let request = Request::from_parts(parts.clone(), Body::from(bytes.clone()));
            let result = self.inner.round_trip(request).await;

            let retry = attempt < max_attempts
                && match &result {
                    Ok(response) => is_retryable(&parts.method, Some(response.status()), false),
                    Err(_) => is_retryable(&parts.method, None, true),
                };
            if !retry {
                return result;
            }

            let delay = self.backoff.delay(attempt);
            match &result {
                Ok(response) => tracing::info!(
                    attempt,
                    status = %response.status(),
                    delay = ?delay,
                    "Retrying request"
                ),
                Err(e) => tracing::info!(
                    attempt,
                    error = %e,
                    delay = ?delay,
                    "Retrying after upstream error"
                ),
            }
            drop(result);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Decorator applying [`Retry`].
pub fn retry(config: RetryConfig) -> Decorator<Arc<dyn Transport>> {
    decorator(move |inner: Arc<dyn Transport>| {
        Arc::new(Retry::new(inner, config.clone())) as Arc<dyn Transport>
    })
}
