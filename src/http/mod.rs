//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, catch-all route)
//!     → streaming.rs (ResponseSink over a hyper response)
//!     → middleware/ (request ID, access log)
//!     → Handler (the proxy)
//! ```
//!
//! Header helpers (`headers.rs`, `header_list.rs`) and the sink
//! capabilities (`sink.rs`, `observer.rs`) are shared with the proxy core.

pub mod handler;
pub mod header_list;
pub mod headers;
pub mod middleware;
pub mod observer;
pub mod server;
pub mod sink;
pub mod streaming;

pub use handler::Handler;
pub use observer::ResponseObserver;
pub use server::{shutdown_signal, HttpServer};
pub use sink::{Duplex, Flush, Hijack, HijackedConn, RawConn, ResponseSink};
pub use streaming::{PendingResponse, StreamingSink};
