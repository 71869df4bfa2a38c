//! Reusable copy buffers.
//!
//! Body streaming and upgrade pumps borrow a buffer for the duration of a
//! copy and hand it back on drop.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::BufferPoolConfig;

/// Shared pool of fixed-size byte buffers.
#[derive(Clone, Debug)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    idle: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    max_idle: usize,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::new()),
                buffer_size: buffer_size.max(1),
                max_idle,
            }),
        }
    }

    pub fn from_config(config: &BufferPoolConfig) -> Self {
        Self::new(config.buffer_size, config.max_pooled)
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Number of buffers waiting for reuse.
    pub fn idle(&self) -> usize {
        self.inner.lock().len()
    }

    /// Borrow a buffer. It returns to the pool when the guard drops.
    pub fn checkout(&self) -> PooledBuffer {
        let buf = self
            .inner
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0; self.inner.buffer_size]);
        PooledBuffer {
            buf,
            pool: Arc::clone(&self.inner),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::from_config(&BufferPoolConfig::default())
    }
}

impl PoolInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Vec<u8>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A buffer on loan from a [`BufferPool`].
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut idle = self.pool.lock();
        if idle.len() < self.pool.max_idle {
            idle.push(std::mem::take(&mut self.buf));
        }
    }
}
