use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FrameError, Result};

/// Default size class: 2 MiB, enough for one encoded video frame.
pub const DEFAULT_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// Default number of free buffers the pool retains.
pub const DEFAULT_POOL_CAPACITY: usize = 20;

/// Size class and capacity of a [`FrameBufferPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Capacity of every pooled buffer, in bytes.
    pub buffer_size: usize,
    /// Maximum number of free buffers held. Half are allocated up front.
    pub capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

impl PoolConfig {
    fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(FrameError::InvalidPoolConfig {
                reason: "buffer_size must be greater than zero".to_string(),
            });
        }
        if self.capacity == 0 {
            return Err(FrameError::InvalidPoolConfig {
                reason: "capacity must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub acquisitions: u64,
    pub hits: u64,
    pub misses: u64,
    pub releases: u64,
    pub discards: u64,
    pub outstanding: usize,
    pub free: usize,
    pub buffer_size: usize,
    pub capacity: usize,
}

impl PoolStats {
    /// Fraction of acquisitions served from the free bag.
    pub fn hit_rate(&self) -> f64 {
        if self.acquisitions == 0 {
            0.0
        } else {
            self.hits as f64 / self.acquisitions as f64
        }
    }
}

/// A bag of reusable buffers of one fixed size class.
///
/// Acquire and release never block and never fail. A buffer is owned by the
/// caller while checked out. Only buffers whose capacity still equals the
/// size class are taken back; anything else is dropped and counted as a
/// discard.
///
/// Releasing the same allocation twice, or one obtained elsewhere with a
/// matching capacity, is a caller bug the pool does not detect.
pub struct FrameBufferPool {
    free: ArrayQueue<BytesMut>,
    buffer_size: usize,
    outstanding: AtomicUsize,
    acquisitions: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    releases: AtomicU64,
    discards: AtomicU64,
}

impl FrameBufferPool {
    /// Create a pool, pre-allocating half of its capacity.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let pool = Self {
            free: ArrayQueue::new(config.capacity),
            buffer_size: config.buffer_size,
            outstanding: AtomicUsize::new(0),
            acquisitions: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            discards: AtomicU64::new(0),
        };
        for _ in 0..config.capacity / 2 {
            let _ = pool.free.push(BytesMut::with_capacity(config.buffer_size));
        }
        debug!(
            buffer_size = config.buffer_size,
            capacity = config.capacity,
            preallocated = pool.free.len(),
            "frame buffer pool created"
        );
        Ok(pool)
    }

    /// The size class of pooled buffers.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Maximum number of free buffers retained.
    pub fn capacity(&self) -> usize {
        self.free.capacity()
    }

    /// Take an empty buffer of the pool's size class.
    pub fn acquire(&self) -> BytesMut {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        match self.free.pop() {
            Some(buf) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(buffer_size = self.buffer_size, "frame buffer pool miss");
                BytesMut::with_capacity(self.buffer_size)
            }
        }
    }

    /// Take an empty buffer able to hold `len` bytes.
    ///
    /// Requests larger than the size class get a one-off allocation that the
    /// pool will refuse to take back.
    pub fn acquire_with_capacity(&self, len: usize) -> BytesMut {
        if len <= self.buffer_size {
            return self.acquire();
        }
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(
            requested = len,
            buffer_size = self.buffer_size,
            "oversized buffer allocated outside the pool"
        );
        BytesMut::with_capacity(len)
    }

    /// Return a buffer to the pool.
    pub fn release(&self, mut buf: BytesMut) {
        if buf.capacity() != self.buffer_size {
            self.discards.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let _ = self
            .outstanding
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        buf.clear();
        match self.free.push(buf) {
            Ok(()) => {
                self.releases.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.discards.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Account for a checked-out buffer that will never come back.
    pub fn forget(&self) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            discards: self.discards.load(Ordering::Relaxed),
            outstanding: self.outstanding.load(Ordering::Relaxed),
            free: self.free.len(),
            buffer_size: self.buffer_size,
            capacity: self.free.capacity(),
        }
    }
}

impl std::fmt::Debug for FrameBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBufferPool")
            .field("stats", &self.stats())
            .finish()
    }
}
