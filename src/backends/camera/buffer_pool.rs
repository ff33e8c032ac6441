// SPDX-License-Identifier: GPL-3.0-only

//! Reusable frame buffers for the capture loop
//!
//! The capture thread takes a buffer from the pool, lets the device fill it
//! and wraps it in a [`CameraFrame`](super::CameraFrame). When the last
//! reference to the frame is dropped the buffer goes back to the pool, so a
//! steady stream does not allocate per frame.

use std::sync::{Arc, Mutex, PoisonError};

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
}

/// Bounded pool of byte buffers
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool that keeps at most `capacity` idle buffers
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(capacity)),
                capacity,
            }),
        }
    }

    /// Take an empty buffer, reusing an idle one if available
    pub fn take(&self) -> PooledBuffer {
        let data = self
            .inner
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default();
        PooledBuffer {
            data,
            pool: Arc::clone(&self.inner),
        }
    }

    /// Number of idle buffers waiting for reuse
    pub fn idle(&self) -> usize {
        self.inner
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("idle", &self.idle())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

/// A buffer on loan from a [`BufferPool`]
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    /// Mutable access for the device to fill
    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut data = std::mem::take(&mut self.data);
        data.clear();
        let mut free = self.pool.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.pool.capacity {
            free.push(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_returns_on_drop() {
        let pool = BufferPool::new(2);
        let mut buf = pool.take();
        buf.as_mut_vec().extend_from_slice(&[1, 2, 3]);
        assert_eq!(buf.len(), 3);
        assert_eq!(pool.idle(), 0);

        drop(buf);
        assert_eq!(pool.idle(), 1);

        // Reused buffer comes back empty but keeps its allocation
        let buf = pool.take();
        assert!(buf.is_empty());
        assert!(buf.data.capacity() >= 3);
    }

    #[test]
    fn test_capacity_bound() {
        let pool = BufferPool::new(1);
        let a = pool.take();
        let b = pool.take();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }
}
