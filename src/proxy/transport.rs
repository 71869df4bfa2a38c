//! Upstream transports.
//!
//! # Responsibilities
//! - Define the [`Transport`] seam: one request in, one response head out
//! - Provide the hyper client transport used in production
//! - Adapt closures into transports for tests and embedding
//!
//! # Design Decisions
//! - Responses keep their extensions, so a `101` response still carries
//!   hyper's upgrade handle
//! - Transports that are not hyper can hand over a raw stream through the
//!   [`UpgradeIo`] response extension

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::USER_AGENT;
use axum::http::{Request, Response};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::BoxError;
use crate::http::sink::Duplex;

/// Performs one upstream round trip.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>, BoxError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>, BoxError> {
        (**self).round_trip(request).await
    }
}

/// Raw upstream stream attached to a `101` response.
#[derive(Clone)]
pub struct UpgradeIo(Arc<Mutex<Option<Box<dyn Duplex>>>>);

impl UpgradeIo {
    pub fn new(io: impl Duplex + 'static) -> Self {
        Self(Arc::new(Mutex::new(Some(Box::new(io)))))
    }

    /// Take the stream. Later calls return `None`.
    pub fn take(&self) -> Option<Box<dyn Duplex>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Transport over the hyper client.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpConnector, Body>,
}

impl HyperTransport {
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(connect_timeout);
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn round_trip(&self, mut request: Request<Body>) -> Result<Response<Body>, BoxError> {
        let empty_agent = request
            .headers()
            .get(USER_AGENT)
            .is_some_and(|v| v.is_empty());
        if empty_agent {
            request.headers_mut().remove(USER_AGENT);
        }
        let response = self.client.request(request).await?;
        Ok(response.map(Body::new))
    }
}

/// Transport backed by a closure.
pub struct TransportFn<F> {
    f: F,
}

/// Wrap `f` as a [`Transport`].
pub fn transport_fn<F, Fut>(f: F) -> TransportFn<F>
where
    F: Fn(Request<Body>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<Body>, BoxError>> + Send,
{
    TransportFn { f }
}

#[async_trait]
impl<F, Fut> Transport for TransportFn<F>
where
    F: Fn(Request<Body>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<Body>, BoxError>> + Send,
{
    async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>, BoxError> {
        (self.f)(request).await
    }
}
