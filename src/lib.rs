//! Streaming HTTP reverse proxy library.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ http::server ──▶ handler chain ──▶ proxy::Proxy
//!                (axum/hyper)     (request id,        │
//!                                  access log)        │ rewrite (load_balancer)
//!                                                     ▼
//!                                              transport chain ──▶ Upstream
//!                                              (timeout, retry)
//!     Client ◀── StreamingSink ◀── streamer / upgrade ◀───────────┘
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod load_balancer;
pub mod middleware;
pub mod observability;
pub mod proxy;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use error::{BoxError, ProxyError};
pub use http::{Handler, HttpServer, ResponseSink};
pub use middleware::{Chain, HandlerChain, TransportChain};
pub use proxy::{Proxy, ProxyBuilder, ProxyRequest, Transport};
