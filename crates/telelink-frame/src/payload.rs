use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::pool::FrameBufferPool;

/// A buffer checked out of a [`FrameBufferPool`].
///
/// Dropping it returns the buffer to the pool; [`release`](Self::release)
/// does the same explicitly. [`detach`](Self::detach) keeps the bytes and
/// gives up the pool slot.
pub struct PooledBuffer {
    buf: Option<BytesMut>,
    pool: Arc<FrameBufferPool>,
}

impl PooledBuffer {
    /// Check out a buffer able to hold `len` bytes.
    pub fn checkout(pool: &Arc<FrameBufferPool>, len: usize) -> Self {
        Self {
            buf: Some(pool.acquire_with_capacity(len)),
            pool: Arc::clone(pool),
        }
    }

    /// Append bytes.
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        if let Some(buf) = self.buf.as_mut() {
            buf.extend_from_slice(data);
        }
    }

    /// Return the buffer to its pool now.
    pub fn release(mut self) {
        self.give_back();
    }

    /// Take the contents out of the pool's custody.
    pub fn detach(mut self) -> Bytes {
        match self.buf.take() {
            Some(buf) => {
                if buf.capacity() == self.pool.buffer_size() {
                    self.pool.forget();
                }
                buf.freeze()
            }
            None => Bytes::new(),
        }
    }

    fn give_back(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.give_back();
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len())
            .finish()
    }
}

/// An inbound message handed to the caller.
#[derive(Debug)]
pub enum InboundPayload {
    /// Arrived whole; this is the network buffer itself. Nothing to release.
    Direct(Bytes),
    /// Reassembled from fragments into a pooled buffer.
    Pooled(PooledBuffer),
}

impl InboundPayload {
    pub fn len(&self) -> usize {
        self.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_ref().is_empty()
    }

    /// Whether the payload occupies a pool buffer.
    pub fn is_pooled(&self) -> bool {
        matches!(self, Self::Pooled(_))
    }

    /// Hand a pooled buffer back to the pool. No-op for direct payloads.
    pub fn release(self) {
        if let Self::Pooled(buf) = self {
            buf.release();
        }
    }

    /// Convert into owned bytes, giving up any pool slot.
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Direct(bytes) => bytes,
            Self::Pooled(buf) => buf.detach(),
        }
    }
}

impl AsRef<[u8]> for InboundPayload {
    fn as_ref(&self) -> &[u8] {
        match self {
            Self::Direct(bytes) => &bytes[..],
            Self::Pooled(buf) => &buf[..],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;

    fn pool() -> Arc<FrameBufferPool> {
        Arc::new(
            FrameBufferPool::new(PoolConfig {
                buffer_size: 32,
                capacity: 2,
            })
            .unwrap(),
        )
    }

    #[test]
    fn drop_returns_buffer_to_pool() {
        let pool = pool();
        let mut buf = PooledBuffer::checkout(&pool, 4);
        buf.extend_from_slice(b"data");
        assert_eq!(&*buf, b"data");
        assert_eq!(pool.stats().outstanding, 1);

        drop(buf);
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.releases, 1);
    }

    #[test]
    fn detach_keeps_bytes_and_skips_pool() {
        let pool = pool();
        let mut buf = PooledBuffer::checkout(&pool, 4);
        buf.extend_from_slice(b"keep");
        let bytes = buf.detach();
        assert_eq!(&bytes[..], b"keep");
        let stats = pool.stats();
        assert_eq!(stats.releases, 0);
        assert_eq!(stats.outstanding, 0);
    }

    #[test]
    fn into_bytes_gives_up_the_pool_slot() {
        let pool = pool();
        let mut first = PooledBuffer::checkout(&pool, 3);
        first.extend_from_slice(b"one");
        let second = PooledBuffer::checkout(&pool, 3);
        assert_eq!(pool.stats().outstanding, 2);

        let bytes = InboundPayload::Pooled(first).into_bytes();
        assert_eq!(&bytes[..], b"one");
        assert_eq!(pool.stats().outstanding, 1);

        drop(second);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn direct_payload_release_is_noop() {
        let payload = InboundPayload::Direct(Bytes::from_static(b"abc"));
        assert!(!payload.is_pooled());
        assert_eq!(payload.len(), 3);
        payload.release();
    }

    #[test]
    fn pooled_payload_release() {
        let pool = pool();
        let mut buf = PooledBuffer::checkout(&pool, 3);
        buf.extend_from_slice(b"xyz");
        let payload = InboundPayload::Pooled(buf);
        assert!(payload.is_pooled());
        assert_eq!(payload.as_ref(), b"xyz");
        payload.release();
        assert_eq!(pool.stats().releases, 1);
    }
}
