//! Access logging.
//!
//! Observes the response written by the wrapped handler and emits one
//! structured log line per request.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use std::sync::Arc;
use std::time::Instant;

use crate::http::middleware::request_id::RequestId;
use crate::http::observer::ResponseObserver;
use crate::http::sink::ResponseSink;
use crate::http::Handler;
use crate::middleware::{decorator, Decorator};

/// Handler decorator logging each completed request.
pub struct AccessLog {
    inner: Arc<dyn Handler>,
}

impl AccessLog {
    pub fn new(inner: Arc<dyn Handler>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Handler for AccessLog {
    async fn serve(&self, sink: &mut dyn ResponseSink, request: Request<Body>) {
        let start = Instant::now();
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let request_id = request
            .extensions()
            .get::<RequestId>()
            .map(|id| id.as_str().to_string())
            .unwrap_or_else(|| "-".to_string());

        let mut observer = ResponseObserver::new(sink);
        self.inner.serve(&mut observer, request).await;

        tracing::info!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = observer.status_code(),
            bytes = observer.bytes_code(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Request completed"
        );
    }
}

/// Decorator applying [`AccessLog`].
pub fn access_log() -> Decorator<Arc<dyn Handler>> {
    decorator(|inner: Arc<dyn Handler>| Arc::new(AccessLog::new(inner)) as Arc<dyn Handler>)
}
