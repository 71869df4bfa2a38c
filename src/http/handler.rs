//! The handler seam between the HTTP server and the proxy.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use std::sync::Arc;

use crate::http::sink::ResponseSink;

/// Serves a request by writing a response into a sink.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn serve(&self, sink: &mut dyn ResponseSink, request: Request<Body>);
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn serve(&self, sink: &mut dyn ResponseSink, request: Request<Body>) {
        (**self).serve(sink, request).await
    }
}
