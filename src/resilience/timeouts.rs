//! Timeout enforcement.
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - The deadline covers the response head only; streaming bodies and
//!   upgraded connections are not cut off
//! - Timeout errors are distinct from other transport errors

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use std::sync::Arc;
use std::time::Duration;

use crate::error::BoxError;
use crate::middleware::{decorator, Decorator};
use crate::proxy::Transport;

/// The upstream did not answer in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("upstream did not respond within {0:?}")]
pub struct UpstreamTimeout(pub Duration);

/// Transport decorator bounding the wait for a response head.
pub struct Timeout {
    inner: Arc<dyn Transport>,
    duration: Duration,
}

impl Timeout {
    pub fn new(inner: Arc<dyn Transport>, duration: Duration) -> Self {
        Self { inner, duration }
    }
}

#[async_trait]
impl Transport for Timeout {
    async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>, BoxError> {
        match tokio::time::timeout(self.duration, self.inner.round_trip(request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout = ?self.duration, "Upstream request timed out");
                Err(Box::new(UpstreamTimeout(self.duration)))
            }
        }
    }
}

/// Decorator applying [`Timeout`].
pub fn timeout(duration: Duration) -> Decorator<Arc<dyn Transport>> {
    decorator(move |inner: Arc<dyn Transport>| Arc::new(Timeout::new(inner, duration)) as Arc<dyn Transport>)
}
