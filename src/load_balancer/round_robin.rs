//! Round-robin target selection.

use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

/// Returned when a selector is built from an empty target list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("round robin requires at least one target")]
pub struct EmptyTargets;

/// Round-robin selector.
/// Stores an internal counter to rotate through targets.
#[derive(Debug)]
pub struct RoundRobin {
    targets: Vec<Url>,
    counter: AtomicUsize,
}

impl RoundRobin {
    /// Create a selector over a non-empty, ordered list of targets.
    pub fn new(targets: Vec<Url>) -> Result<Self, EmptyTargets> {
        if targets.is_empty() {
            return Err(EmptyTargets);
        }
        Ok(Self {
            targets,
            counter: AtomicUsize::new(0),
        })
    }

    /// Select the next target. Every call advances the index by exactly one.
    pub fn next_target(&self) -> &Url {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.targets.len();
        &self.targets[index]
    }

    pub fn targets(&self) -> &[Url] {
        &self.targets
    }
}
