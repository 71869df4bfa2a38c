//! Ordered decorator chains.
//!
//! A [`Chain`] is a list of decorators applied around a target, so that
//! element 0 is outermost:
//!
//! ```text
//! compose([a, b, c], target) = a(b(c(target)))
//! ```
//!
//! The same algebra serves both sides of the proxy: [`HandlerChain`]
//! wraps the inbound handler, [`TransportChain`] wraps the upstream
//! transport.
//!
//! # Design Decisions
//! - Decorators are `tower::Layer`s whose service type equals their input,
//!   so any tower layer of that shape can be spliced in
//! - Editing operations mutate the chain in place; composition is
//!   non-destructive and may be repeated

use std::fmt;
use std::sync::Arc;
use tower::layer::layer_fn;
use tower::Layer;

use crate::http::Handler;
use crate::proxy::Transport;

/// A single decorator.
pub type Decorator<T> = Arc<dyn Layer<T, Service = T> + Send + Sync>;

/// Decorators around the inbound handler.
pub type HandlerChain = Chain<Arc<dyn Handler>>;

/// Decorators around the upstream transport.
pub type TransportChain = Chain<Arc<dyn Transport>>;

/// Build a decorator from a wrapping function.
pub fn decorator<T, F>(wrap: F) -> Decorator<T>
where
    F: Fn(T) -> T + Send + Sync + 'static,
    T: 'static,
{
    Arc::new(layer_fn(wrap))
}

/// Ordered list of decorators.
pub struct Chain<T> {
    decorators: Vec<Decorator<T>>,
}

impl<T> Chain<T> {
    pub fn new() -> Self {
        Self {
            decorators: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.decorators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decorators.is_empty()
    }

    /// Append a decorator, builder style.
    pub fn with(mut self, decorator: Decorator<T>) -> Self {
        self.decorators.push(decorator);
        self
    }

    /// Append a decorator.
    pub fn push(&mut self, decorator: Decorator<T>) {
        self.decorators.push(decorator);
    }

    /// Splice `ms` in at `index`, clamped to `0..=len`.
    pub fn insert_at(&mut self, index: usize, ms: impl IntoIterator<Item = Decorator<T>>) {
        let index = index.min(self.decorators.len());
        self.decorators.splice(index..index, ms);
    }

    /// Insert `ms` before every element and once more after the last one.
    ///
    /// `[a, b]` becomes `[ms.., a, ms.., b, ms..]`. An empty chain stays
    /// empty.
    pub fn insert_between_every_pair(&mut self, ms: &[Decorator<T>]) {
        if self.decorators.is_empty() {
            return;
        }
        self.interleave(ms, true, true);
    }

    /// Insert `ms` in front of every element: `[ms.., a, ms.., b]`.
    pub fn insert_before_all(&mut self, ms: &[Decorator<T>]) {
        self.interleave(ms, true, false);
    }

    /// Insert `ms` behind every element: `[a, ms.., b, ms..]`.
    pub fn insert_after_all(&mut self, ms: &[Decorator<T>]) {
        self.interleave(ms, false, true);
    }

    fn interleave(&mut self, ms: &[Decorator<T>], before: bool, after: bool) {
        let existing = std::mem::take(&mut self.decorators);
        let mut out = Vec::with_capacity(existing.len() * (ms.len() + 1) + ms.len());
        for (i, decorator) in existing.into_iter().enumerate() {
            if before || i > 0 {
                out.extend(ms.iter().cloned());
            }
            out.push(decorator);
        }
        if after && !out.is_empty() {
            out.extend(ms.iter().cloned());
        }
        self.decorators = out;
    }

    /// Wrap `target` with every decorator, element 0 outermost.
    pub fn compose(&self, target: T) -> T {
        self.compose_with(target, &[])
    }

    /// Like [`compose`](Self::compose), with `extra` applied innermost.
    pub fn compose_with(&self, target: T, extra: &[Decorator<T>]) -> T {
        self.decorators
            .iter()
            .chain(extra)
            .rev()
            .fold(target, |inner, decorator| decorator.layer(inner))
    }
}

impl<T> Default for Chain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Chain<T> {
    fn clone(&self) -> Self {
        Self {
            decorators: self.decorators.clone(),
        }
    }
}

impl<T> fmt::Debug for Chain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("len", &self.decorators.len())
            .finish()
    }
}

impl<T> FromIterator<Decorator<T>> for Chain<T> {
    fn from_iter<I: IntoIterator<Item = Decorator<T>>>(iter: I) -> Self {
        Self {
            decorators: iter.into_iter().collect(),
        }
    }
}

impl<T> Layer<T> for Chain<T> {
    type Service = T;

    fn layer(&self, inner: T) -> T {
        self.compose(inner)
    }
}
