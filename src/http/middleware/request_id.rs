//! Request ID propagation.
//!
//! Every request gets an `x-request-id` (UUID v4 unless the client sent
//! one). The ID travels upstream with the request and is echoed on the
//! response.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Request};
use std::sync::Arc;
use uuid::Uuid;

use crate::http::sink::ResponseSink;
use crate::http::Handler;
use crate::middleware::{decorator, Decorator};

/// Header carrying the request ID.
pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Request ID stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Handler decorator assigning request IDs.
pub struct RequestIdHandler {
    inner: Arc<dyn Handler>,
}

impl RequestIdHandler {
    pub fn new(inner: Arc<dyn Handler>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Handler for RequestIdHandler {
    async fn serve(&self, sink: &mut dyn ResponseSink, mut request: Request<Body>) {
        let existing = request
            .headers()
            .get(&X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| RequestId(v.to_string()));
        let id = existing.unwrap_or_else(RequestId::generate);

        if let Ok(value) = HeaderValue::from_str(id.as_str()) {
            request.headers_mut().insert(X_REQUEST_ID.clone(), value.clone());
            sink.headers_mut().insert(X_REQUEST_ID.clone(), value);
        }
        request.extensions_mut().insert(id);

        self.inner.serve(sink, request).await
    }
}

/// Decorator applying [`RequestIdHandler`].
pub fn request_id() -> Decorator<Arc<dyn Handler>> {
    decorator(|inner: Arc<dyn Handler>| Arc::new(RequestIdHandler::new(inner)) as Arc<dyn Handler>)
}
