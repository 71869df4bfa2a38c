//! Upstream target selection.
//!
//! # Data Flow
//! ```text
//! Rewrite invoked for a request
//!     → round_robin.rs (rotate through configured upstreams)
//!     → selected Url handed to the URL merge helper
//! ```
//!
//! # Design Decisions
//! - Upstream list is fixed at construction and never empty
//! - The rotation index is the only request-time mutable state

pub mod round_robin;

pub use round_robin::{EmptyTargets, RoundRobin};
