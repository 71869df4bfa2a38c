//! Transport-side resilience.
//!
//! # Data Flow
//! ```text
//! Proxy round trip
//!     → timeouts.rs (deadline for the response head)
//!     → retries.rs (replay idempotent requests with backoff)
//!     → base transport (hyper client)
//! ```
//!
//! # Design Decisions
//! - Every piece is a transport decorator, spliced into a `TransportChain`
//! - Retries only for idempotent methods with a replayable body
//! - The deadline covers the whole retry sequence when timeout sits outside
//!   retry in the chain

pub mod backoff;
pub mod retries;
pub mod timeouts;

pub use backoff::Backoff;
pub use retries::{is_retryable, retry, Retry};
pub use timeouts::{timeout, Timeout, UpstreamTimeout};
