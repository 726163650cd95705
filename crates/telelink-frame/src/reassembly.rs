use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::payload::{InboundPayload, PooledBuffer};
use crate::pool::FrameBufferPool;

/// Joins message fragments into whole payloads.
///
/// A message that arrives as a single final fragment is passed through
/// untouched. Otherwise fragments accumulate in an internal buffer (which
/// grows as needed) and the finished message is copied once into a pooled
/// buffer. After a large message the internal buffer shrinks back to its
/// initial capacity once it has grown past twice that size.
///
/// Single-consumer: owned by one channel and fed by its one reader.
pub struct Reassembler {
    buf: BytesMut,
    initial_capacity: usize,
    pending: bool,
    pool: Arc<FrameBufferPool>,
}

impl Reassembler {
    /// Create a reassembler that copies finished messages into `pool` buffers.
    pub fn new(pool: Arc<FrameBufferPool>, initial_capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(initial_capacity),
            initial_capacity,
            pending: false,
            pool,
        }
    }

    /// Feed one fragment. Returns the message once `last` completes it.
    pub fn push(&mut self, fragment: Bytes, last: bool) -> Option<InboundPayload> {
        if last && !self.pending {
            return Some(InboundPayload::Direct(fragment));
        }

        self.buf.extend_from_slice(&fragment);
        self.pending = true;
        if !last {
            trace!(buffered = self.buf.len(), "fragment buffered");
            return None;
        }

        let mut out = PooledBuffer::checkout(&self.pool, self.buf.len());
        out.extend_from_slice(&self.buf);
        self.reset();
        Some(InboundPayload::Pooled(out))
    }

    /// Whether a partial message is buffered.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Bytes of the partial message buffered so far.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Current capacity of the internal buffer.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Drop any partial message, e.g. after the link it came from closed.
    pub fn reset(&mut self) {
        self.pending = false;
        if self.buf.capacity() > self.initial_capacity.saturating_mul(2) {
            trace!(
                capacity = self.buf.capacity(),
                initial = self.initial_capacity,
                "trimming reassembly buffer"
            );
            self.buf = BytesMut::with_capacity(self.initial_capacity);
        } else {
            self.buf.clear();
        }
    }
}

impl std::fmt::Debug for Reassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reassembler")
            .field("buffered", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .field("pending", &self.pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;

    fn pool(buffer_size: usize) -> Arc<FrameBufferPool> {
        Arc::new(
            FrameBufferPool::new(PoolConfig {
                buffer_size,
                capacity: 4,
            })
            .unwrap(),
        )
    }

    #[test]
    fn whole_message_is_zero_copy() {
        let mut r = Reassembler::new(pool(64), 16);
        let data = Bytes::from_static(b"complete");
        let out = r.push(data.clone(), true).unwrap();
        match out {
            InboundPayload::Direct(bytes) => {
                assert_eq!(bytes, data);
                assert_eq!(bytes.as_ptr(), data.as_ptr());
            }
            other => panic!("expected direct payload, got {other:?}"),
        }
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn three_fragments_join_into_one_payload() {
        let pool = pool(64);
        let mut r = Reassembler::new(Arc::clone(&pool), 16);
        let a = vec![1u8; 10];
        let b = vec![2u8; 10];
        let c = vec![3u8; 5];

        assert!(r.push(Bytes::from(a.clone()), false).is_none());
        assert!(r.push(Bytes::from(b.clone()), false).is_none());
        assert!(r.is_pending());
        let out = r.push(Bytes::from(c.clone()), true).unwrap();

        let expected: Vec<u8> = [a, b, c].concat();
        assert!(out.is_pooled());
        assert_eq!(out.len(), 25);
        assert_eq!(out.as_ref(), expected.as_slice());
        assert!(!r.is_pending());

        out.release();
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn message_after_fragmented_one_takes_fast_path() {
        let mut r = Reassembler::new(pool(64), 16);
        r.push(Bytes::from_static(b"ab"), false);
        let first = r.push(Bytes::from_static(b"cd"), true).unwrap();
        assert_eq!(first.as_ref(), b"abcd");

        let second = r.push(Bytes::from_static(b"ef"), true).unwrap();
        assert!(!second.is_pooled());
    }

    #[test]
    fn empty_first_fragment_still_reassembles() {
        let mut r = Reassembler::new(pool(64), 16);
        assert!(r.push(Bytes::new(), false).is_none());
        let out = r.push(Bytes::from_static(b"tail"), true).unwrap();
        assert!(out.is_pooled());
        assert_eq!(out.as_ref(), b"tail");
    }

    #[test]
    fn grows_for_large_messages_then_trims() {
        let mut r = Reassembler::new(pool(64), 8);
        r.push(Bytes::from(vec![0u8; 40]), false);
        assert!(r.capacity() >= 40);

        let out = r.push(Bytes::from(vec![0u8; 40]), true).unwrap();
        assert_eq!(out.len(), 80);
        // Larger than the pool's size class: served outside the pool.
        assert!(out.is_pooled());
        assert_eq!(r.capacity(), 8);
    }

    #[test]
    fn reset_discards_partial_message() {
        let mut r = Reassembler::new(pool(64), 16);
        r.push(Bytes::from_static(b"partial"), false);
        r.reset();
        assert!(!r.is_pending());
        let out = r.push(Bytes::from_static(b"fresh"), true).unwrap();
        assert_eq!(out.as_ref(), b"fresh");
        assert!(!out.is_pooled());
    }
}
