//! Outbound buffer allocation
//!
//! Every outbound frame is assembled in a buffer taken from the connection's
//! [`BufferAllocator`]. Buffers are handed out inside a [`BufferGuard`] that
//! returns them to the allocator when dropped, so a buffer is freed exactly
//! once whichever way the sending code exits.

use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use remlink_proto::HEADER_LEN;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of outbound buffers
pub trait BufferAllocator: Send + Sync {
    /// Hand out an empty buffer
    fn allocate(&self) -> BytesMut;

    /// Take a buffer back
    fn free(&self, buf: BytesMut);
}

/// Allocator that keeps a bounded pool of freed buffers for reuse
pub struct PooledAllocator {
    buffer_size: usize,
    capacity: usize,
    pool: Mutex<Vec<BytesMut>>,
    allocated: AtomicU64,
    freed: AtomicU64,
}

impl PooledAllocator {
    /// Create an allocator handing out buffers of `buffer_size` bytes and
    /// keeping at most `capacity` of them pooled
    pub fn new(buffer_size: usize, capacity: usize) -> Self {
        Self {
            buffer_size,
            capacity,
            pool: Mutex::new(Vec::with_capacity(capacity)),
            allocated: AtomicU64::new(0),
            freed: AtomicU64::new(0),
        }
    }

    /// Total buffers handed out
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Acquire)
    }

    /// Total buffers returned
    pub fn freed(&self) -> u64 {
        self.freed.load(Ordering::Acquire)
    }

    /// Buffers handed out and not yet returned
    pub fn outstanding(&self) -> u64 {
        self.allocated().saturating_sub(self.freed())
    }

    /// Buffers currently pooled
    pub fn pooled(&self) -> usize {
        self.pool.lock().len()
    }
}

impl BufferAllocator for PooledAllocator {
    fn allocate(&self) -> BytesMut {
        self.allocated.fetch_add(1, Ordering::AcqRel);
        self.pool
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_size))
    }

    fn free(&self, mut buf: BytesMut) {
        self.freed.fetch_add(1, Ordering::AcqRel);
        buf.clear();
        // Buffers that grew or were split are not worth keeping.
        if buf.capacity() < self.buffer_size || buf.capacity() > self.buffer_size * 4 {
            return;
        }
        let mut pool = self.pool.lock();
        if pool.len() < self.capacity {
            pool.push(buf);
        }
    }
}

impl fmt::Debug for PooledAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledAllocator")
            .field("buffer_size", &self.buffer_size)
            .field("capacity", &self.capacity)
            .field("allocated", &self.allocated())
            .field("freed", &self.freed())
            .finish()
    }
}

/// Buffer on loan from an allocator, returned on drop
pub struct BufferGuard {
    buf: BytesMut,
    allocator: Arc<dyn BufferAllocator>,
}

impl BufferGuard {
    /// Borrow a buffer from an allocator
    pub fn allocate(allocator: &Arc<dyn BufferAllocator>) -> Self {
        Self {
            buf: allocator.allocate(),
            allocator: Arc::clone(allocator),
        }
    }

    /// Reserve the transport header at the front of the buffer
    pub fn reserve_header(&mut self) {
        self.buf.put_bytes(0, HEADER_LEN);
    }
}

impl Deref for BufferGuard {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for BufferGuard {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for BufferGuard {
    fn drop(&mut self) {
        self.allocator.free(std::mem::take(&mut self.buf));
    }
}

impl fmt::Debug for BufferGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferGuard").field("len", &self.buf.len()).finish()
    }
}
