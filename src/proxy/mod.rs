//! Reverse proxy core.
//!
//! # Data Flow
//! ```text
//! inbound request + sink
//!     → forward.rs (sanitize, rewrite, hooks)
//!     → transport.rs (upstream round trip, possibly decorated)
//!     → upgrade.rs  on 101: hijack and splice
//!     → streamer.rs otherwise: head, body, trailers
//!     → errors → ErrorHandler
//! ```
//!
//! # Design Decisions
//! - The inbound request is never mutated; the outbound one is a clone
//! - One shared buffer pool serves body copies and upgrade pumps
//! - Every failure is a `ProxyError`; the error handler decides what the
//!   client sees

pub mod buffer_pool;
pub mod forward;
pub mod rewrite;
pub mod streamer;
pub mod transport;
pub mod upgrade;

pub use buffer_pool::{BufferPool, PooledBuffer};
pub use forward::{DefaultErrorHandler, ErrorHandler, PostHook, PreHook, Proxy, ProxyBuilder};
pub use rewrite::{join_with_separator, merge_url, ProxyRequest, RewriteFn};
pub use streamer::FlushPolicy;
pub use transport::{transport_fn, HyperTransport, Transport, TransportFn, UpgradeIo};
