//! Reusable byte buffer pool
//!
//! Part buffers are large (tens of MiB), so the assembler draws them from
//! here and uploaded payloads are handed back. Reclaimed buffers are zeroed
//! before reuse so file content never lingers in pooled memory.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Thread-safe byte buffer pool
pub struct ByteBufferPool {
    buffers: Mutex<Vec<BytesMut>>,
    buffer_capacity: usize,
    max_buffers: usize,
    reclaimed: AtomicU64,
}

impl ByteBufferPool {
    /// Create a new buffer pool
    ///
    /// Buffers are allocated on demand; at most `max_buffers` idle buffers
    /// are retained.
    pub fn new(max_buffers: usize, buffer_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            buffers: Mutex::new(Vec::with_capacity(max_buffers)),
            buffer_capacity,
            max_buffers,
            reclaimed: AtomicU64::new(0),
        })
    }

    /// Acquire an empty buffer from the pool
    pub fn acquire(&self) -> BytesMut {
        self.buffers
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_capacity))
    }

    /// Return a buffer to the pool
    pub fn release(&self, mut buffer: BytesMut) {
        buffer.clear();

        let mut buffers = self.buffers.lock();
        if buffers.len() < self.max_buffers && buffer.capacity() >= self.buffer_capacity {
            buffers.push(buffer);
        }
    }

    /// Zero an uploaded payload and return its memory to the pool
    ///
    /// Only possible while `data` is the sole handle to its allocation;
    /// otherwise the handle is simply dropped. Returns whether the payload
    /// was reclaimed.
    pub fn reclaim(&self, data: Bytes) -> bool {
        match data.try_into_mut() {
            Ok(mut buffer) => {
                buffer.fill(0);
                self.reclaimed.fetch_add(1, Ordering::Relaxed);
                self.release(buffer);
                true
            }
            Err(_) => false,
        }
    }

    /// Capacity of freshly allocated buffers
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Get current pool size
    pub fn available(&self) -> usize {
        self.buffers.lock().len()
    }

    /// Number of payloads zeroed and reclaimed so far
    pub fn reclaimed(&self) -> u64 {
        self.reclaimed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pool() {
        let pool = ByteBufferPool::new(2, 1024);

        let b1 = pool.acquire();
        let b2 = pool.acquire();
        let b3 = pool.acquire();
        assert_eq!(pool.available(), 0);

        pool.release(b1);
        pool.release(b2);
        pool.release(b3);

        // Capped at max_buffers
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_release_drops_small_buffers() {
        let pool = ByteBufferPool::new(4, 1024);
        pool.release(BytesMut::with_capacity(16));
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_reclaim_requires_unique_handle() {
        let pool = ByteBufferPool::new(4, 64);

        let mut buffer = pool.acquire();
        buffer.extend_from_slice(b"confidential");
        let data = buffer.freeze();
        let other = data.clone();

        assert!(!pool.reclaim(data));
        assert_eq!(pool.reclaimed(), 0);

        assert!(pool.reclaim(other));
        assert_eq!(pool.reclaimed(), 1);
        assert!(pool.acquire().is_empty());
    }
}
