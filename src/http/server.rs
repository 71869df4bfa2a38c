//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with a single catch-all handler
//! - Wire up tracing middleware
//! - Hand each request, with a streaming sink, to the proxy handler
//! - Serve with connection info and graceful shutdown
//!
//! # Design Decisions
//! - The handler runs on its own task so the response head can be
//!   returned to hyper while the body is still being written
//! - Upgrade and peer-address information is moved from hyper into request
//!   extensions the proxy understands

use axum::{
    extract::{ConnectInfo, Request, State},
    response::Response,
    Router,
};
use hyper::upgrade::OnUpgrade;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::http::headers::ClientAddr;
use crate::http::streaming::StreamingSink;
use crate::http::Handler;

/// Application state injected into the catch-all handler.
#[derive(Clone)]
struct AppState {
    handler: Arc<dyn Handler>,
    chunk_size: usize,
}

/// HTTP server in front of a [`Handler`].
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Serve every request with `handler`. Body writes are coalesced into
    /// chunks of up to `chunk_size` bytes.
    pub fn new(handler: Arc<dyn Handler>, chunk_size: usize) -> Self {
        let state = AppState {
            handler,
            chunk_size,
        };
        let router = Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(TraceLayer::new_for_http());
        Self { router }
    }

    /// Run until `shutdown` resolves, then drain in-flight connections.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut request: Request,
) -> Response {
    let on_upgrade = request.extensions_mut().remove::<OnUpgrade>();
    request
        .extensions_mut()
        .insert(ClientAddr::new(peer.to_string(), false));

    let (mut sink, pending) = StreamingSink::new(on_upgrade, state.chunk_size);
    let handler = state.handler.clone();
    tokio::spawn(async move {
        handler.serve(&mut sink, request).await;
        sink.finish().await;
    });

    pending.response().await
}

/// Wait for Ctrl+C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
