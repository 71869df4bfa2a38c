//! The proxy orchestrator.
//!
//! [`Proxy`] turns one inbound request into one upstream round trip and
//! streams the result back:
//!
//! 1. Clone the inbound request into an outbound one
//! 2. Strip hop-by-hop and client-supplied forwarding headers
//! 3. Rewrite (pick the upstream)
//! 4. Restore `TE: trailers` and upgrade intent
//! 5. Pre-hook, round trip, post-hook
//! 6. Splice connections on `101`, otherwise copy head, body and trailers
//!
//! Failures become a [`ProxyError`] handed to the [`ErrorHandler`].

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{
    HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, TE, TRAILER, UPGRADE, USER_AGENT,
};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Request, Response, StatusCode};
use hyper::body::Body as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ProxyConfig;
use crate::error::{cause, BoxError, ProxyError};
use crate::http::sink::{self, ResponseSink};
use crate::http::{header_list, headers, Handler};
use crate::load_balancer::RoundRobin;
use crate::middleware::{Decorator, TransportChain};
use crate::observability::metrics;
use crate::proxy::buffer_pool::BufferPool;
use crate::proxy::rewrite::{self, ProxyRequest, RewriteFn};
use crate::proxy::streamer;
use crate::proxy::transport::{HyperTransport, Transport};
use crate::proxy::upgrade;
use crate::resilience::{retry, timeout};

/// Runs on the outbound request right before the round trip.
pub type PreHook = Arc<dyn Fn(&Parts, &mut Request<Body>) -> Result<(), BoxError> + Send + Sync>;

/// Runs on the upstream response. Receives the outbound request head.
pub type PostHook =
    Arc<dyn Fn(&Parts, &mut Response<Body>) -> Result<(), BoxError> + Send + Sync>;

/// Reports a failed proxy attempt to the client.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(&self, sink: &mut dyn ResponseSink, inbound: &Parts, error: ProxyError);
}

/// Logs the error and answers with the bare status, if one may be written.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultErrorHandler;

#[async_trait]
impl ErrorHandler for DefaultErrorHandler {
    async fn handle(&self, sink: &mut dyn ResponseSink, inbound: &Parts, error: ProxyError) {
        metrics::record_error(error.cause());

        if error.is_cancellation() {
            tracing::debug!(
                method = %inbound.method,
                path = %inbound.uri.path(),
                error = %error,
                "Request cancelled"
            );
            return;
        }

        let Some(status) = error.status() else {
            tracing::warn!(
                method = %inbound.method,
                path = %inbound.uri.path(),
                error = %error,
                "Proxy failed after response was committed"
            );
            return;
        };

        tracing::warn!(
            method = %inbound.method,
            path = %inbound.uri.path(),
            status = status.as_u16(),
            error = %error,
            "Proxy request failed"
        );
        sink.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        let reason = status.canonical_reason().unwrap_or_default();
        if let Err(e) = sink.write_head(status).await {
            tracing::debug!(error = %e, "Failed to write error status");
            return;
        }
        if let Err(e) = sink::write_all(sink, reason.as_bytes()).await {
            tracing::debug!(error = %e, "Failed to write error body");
        }
    }
}

/// Reverse proxy handler.
pub struct Proxy {
    rewrite: RewriteFn,
    transport: Arc<dyn Transport>,
    pre_hook: Option<PreHook>,
    post_hook: Option<PostHook>,
    error_handler: Arc<dyn ErrorHandler>,
    buffers: BufferPool,
}

impl Proxy {
    pub fn builder() -> ProxyBuilder {
        ProxyBuilder::default()
    }

    /// Wire a round-robin proxy from configuration: hyper transport with
    /// the configured connect timeout, wrapped in request timeout and
    /// retries.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, BoxError> {
        let targets = Arc::new(RoundRobin::new(config.upstream_urls()?)?);
        let connect = Duration::from_secs(config.timeouts.connect_secs);
        let transport = HyperTransport::new((!connect.is_zero()).then_some(connect));

        let mut chain = TransportChain::new();
        if config.timeouts.request_secs > 0 {
            chain.push(timeout(Duration::from_secs(config.timeouts.request_secs)));
        }
        if config.retries.enabled {
            chain.push(retry(config.retries.clone()));
        }

        Ok(Proxy::builder()
            .rewrite(rewrite::round_robin(targets))
            .transport(transport)
            .transport_chain(chain)
            .buffer_pool(BufferPool::from_config(&config.buffer_pool))
            .try_build()?)
    }

    /// Forward one request. Errors are returned, not reported.
    async fn forward(
        &self,
        sink: &mut dyn ResponseSink,
        inbound: &Parts,
        parts: Parts,
        body: Body,
    ) -> Result<(), ProxyError> {
        let start = Instant::now();
        let mut outbound = Request::from_parts(parts, body);
        prepare_outbound(&mut outbound);

        {
            let mut request = ProxyRequest {
                inbound,
                outbound: &mut outbound,
            };
            (self.rewrite)(&mut request).map_err(|e| {
                ProxyError::new(cause::REWRITE_FAILED, Some(StatusCode::INTERNAL_SERVER_ERROR))
                    .with_source(e)
            })?;
        }

        if header_list::has_token(&inbound.headers, &TE, "trailers") {
            outbound
                .headers_mut()
                .insert(TE, HeaderValue::from_static("trailers"));
        }
        if let Some(protocol) = headers::upgrade_type(&inbound.headers) {
            if let Ok(value) = HeaderValue::from_str(&protocol) {
                outbound
                    .headers_mut()
                    .insert(CONNECTION, HeaderValue::from_static("Upgrade"));
                outbound.headers_mut().insert(UPGRADE, value);
            }
        }

        if let Some(hook) = &self.pre_hook {
            hook(inbound, &mut outbound).map_err(|e| {
                ProxyError::new(cause::PRE_HOOK_FAILED, Some(StatusCode::INTERNAL_SERVER_ERROR))
                    .with_source(e)
            })?;
        }

        let upstream = outbound
            .uri()
            .authority()
            .map(|a| a.to_string())
            .unwrap_or_default();
        let (outbound_head, outbound_body) = outbound.into_parts();
        let outbound = Request::from_parts(outbound_head.clone(), outbound_body);

        tracing::debug!(
            method = %outbound_head.method,
            uri = %outbound_head.uri,
            "Forwarding request"
        );
        let mut response = self.transport.round_trip(outbound).await.map_err(|e| {
            ProxyError::new(cause::TRANSPORT_FAILED, Some(StatusCode::BAD_GATEWAY)).with_source(e)
        })?;

        if let Some(hook) = &self.post_hook {
            hook(&outbound_head, &mut response).map_err(|e| {
                ProxyError::new(cause::POST_HOOK_FAILED, Some(StatusCode::INTERNAL_SERVER_ERROR))
                    .with_source(e)
            })?;
        }

        let status = response.status();
        if status == StatusCode::SWITCHING_PROTOCOLS {
            let result = upgrade::handle_upgrade(sink, inbound, response, &self.buffers).await;
            metrics::record_request(inbound.method.as_str(), status.as_u16(), &upstream, start);
            return result;
        }

        let policy = streamer::flush_policy(response.headers(), response.body().size_hint().exact());
        let announced = headers::announced_trailers(response.headers());

        let (mut head, body) = response.into_parts();
        headers::remove_hop_by_hop(&mut head.headers);
        headers::copy_headers(sink.headers_mut(), &head.headers);
        if !announced.is_empty() {
            let names = announced
                .iter()
                .map(|n| n.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = HeaderValue::from_str(&names) {
                sink.headers_mut().insert(TRAILER, value);
            }
        }

        sink.write_head(status)
            .await
            .map_err(|e| ProxyError::committed(cause::COPY_FAILED).with_source(e))?;
        let outcome = streamer::copy_body(sink, body, policy, &self.buffers).await?;
        metrics::record_response_bytes(outcome.bytes);

        if !announced.is_empty() || outcome.trailers.is_some() {
            sink::flush(sink)
                .await
                .map_err(|e| ProxyError::committed(cause::FLUSH_FAILED).with_source(e))?;
            if let Some(trailers) = &outcome.trailers {
                headers::copy_headers(sink.trailers_mut(), trailers);
            }
        }

        metrics::record_request(inbound.method.as_str(), status.as_u16(), &upstream, start);
        Ok(())
    }
}

/// Outbound defaults: no inbound `Host`, no body for an explicit zero
/// length, an explicit empty `User-Agent`, no hop-by-hop or forwarding
/// headers.
fn prepare_outbound(outbound: &mut Request<Body>) {
    let map = outbound.headers_mut();
    map.remove(axum::http::header::HOST);
    if !map.contains_key(USER_AGENT) {
        map.insert(USER_AGENT, HeaderValue::from_static(""));
    }
    let zero_length = is_zero_length(map);
    headers::remove_hop_by_hop(map);
    headers::remove_forwarded(map);
    if zero_length {
        *outbound.body_mut() = Body::empty();
    }
}

fn is_zero_length(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0")
}

#[async_trait]
impl Handler for Proxy {
    async fn serve(&self, sink: &mut dyn ResponseSink, request: Request<Body>) {
        let (parts, body) = request.into_parts();
        let inbound = parts.clone();
        if let Err(error) = self.forward(sink, &inbound, parts, body).await {
            self.error_handler.handle(sink, &inbound, error).await;
        }
    }
}

/// Builder for [`Proxy`].
#[derive(Default)]
pub struct ProxyBuilder {
    rewrite: Option<RewriteFn>,
    transport: Option<Arc<dyn Transport>>,
    transport_chain: TransportChain,
    pre_hook: Option<PreHook>,
    post_hook: Option<PostHook>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    buffers: Option<BufferPool>,
}

impl ProxyBuilder {
    /// Set the rewrite. Required.
    pub fn rewrite<F>(mut self, rewrite: F) -> Self
    where
        F: Fn(&mut ProxyRequest<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.rewrite = Some(Arc::new(rewrite));
        self
    }

    /// Set the base transport. Defaults to [`HyperTransport`].
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Decorators wrapped around the transport, element 0 outermost.
    pub fn transport_chain(mut self, chain: TransportChain) -> Self {
        self.transport_chain = chain;
        self
    }

    /// Append one transport decorator.
    pub fn transport_layer(mut self, decorator: Decorator<Arc<dyn Transport>>) -> Self {
        self.transport_chain.push(decorator);
        self
    }

    pub fn pre_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Parts, &mut Request<Body>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.pre_hook = Some(Arc::new(hook));
        self
    }

    pub fn post_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Parts, &mut Response<Body>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.post_hook = Some(Arc::new(hook));
        self
    }

    /// Set the error handler. Defaults to [`DefaultErrorHandler`].
    pub fn error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn buffer_pool(mut self, pool: BufferPool) -> Self {
        self.buffers = Some(pool);
        self
    }

    /// Build the proxy, failing if no rewrite was set.
    pub fn try_build(self) -> Result<Proxy, ProxyError> {
        let rewrite = self
            .rewrite
            .ok_or_else(|| ProxyError::committed(cause::MISSING_REWRITE))?;
        let base = self
            .transport
            .unwrap_or_else(|| Arc::new(HyperTransport::default()));
        Ok(Proxy {
            rewrite,
            transport: self.transport_chain.compose(base),
            pre_hook: self.pre_hook,
            post_hook: self.post_hook,
            error_handler: self
                .error_handler
                .unwrap_or_else(|| Arc::new(DefaultErrorHandler)),
            buffers: self.buffers.unwrap_or_default(),
        })
    }

    /// Build the proxy.
    ///
    /// # Panics
    ///
    /// Panics if no rewrite was set.
    pub fn build(self) -> Proxy {
        match self.try_build() {
            Ok(proxy) => proxy,
            Err(e) => panic!("invalid proxy configuration: {}", e),
        }
    }
}
