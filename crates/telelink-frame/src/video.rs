use bytes::Buf;

use crate::error::{FrameError, Result};
use crate::payload::InboundPayload;

/// Length of the header in front of every video payload:
/// presentation timestamp (u64 LE) then duration (u64 LE).
pub const VIDEO_HEADER_LEN: usize = 16;

/// One encoded video frame with its timing header split off.
///
/// The frame keeps the payload it was parsed from, so a pooled payload goes
/// back to its pool when the frame is dropped or released.
#[derive(Debug)]
pub struct VideoFrame {
    pub timestamp: u64,
    pub duration: u64,
    payload: InboundPayload,
}

impl VideoFrame {
    /// Split the timing header off `payload`.
    ///
    /// A payload shorter than the header is rejected and dropped, which
    /// returns any pooled buffer.
    pub fn parse(payload: InboundPayload) -> Result<Self> {
        let len = payload.len();
        if len < VIDEO_HEADER_LEN {
            return Err(FrameError::TruncatedVideoHeader {
                len,
                needed: VIDEO_HEADER_LEN,
            });
        }
        let mut header = &payload.as_ref()[..VIDEO_HEADER_LEN];
        let timestamp = header.get_u64_le();
        let duration = header.get_u64_le();
        Ok(Self {
            timestamp,
            duration,
            payload,
        })
    }

    /// The encoded frame bytes after the header.
    pub fn data(&self) -> &[u8] {
        &self.payload.as_ref()[VIDEO_HEADER_LEN..]
    }

    /// Whether the underlying payload occupies a pool buffer.
    pub fn is_pooled(&self) -> bool {
        self.payload.is_pooled()
    }

    /// Return the underlying buffer to its pool, if it has one.
    pub fn release(self) {
        self.payload.release();
    }

    /// The full payload, header included.
    pub fn into_payload(self) -> InboundPayload {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::{BufMut, Bytes, BytesMut};

    use super::*;
    use crate::payload::PooledBuffer;
    use crate::pool::{FrameBufferPool, PoolConfig};

    fn encoded(timestamp: u64, duration: u64, data: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u64_le(timestamp);
        buf.put_u64_le(duration);
        buf.put_slice(data);
        buf.freeze()
    }

    #[test]
    fn parses_header_and_body() {
        let frame =
            VideoFrame::parse(InboundPayload::Direct(encoded(90_000, 3_000, b"nal"))).unwrap();
        assert_eq!(frame.timestamp, 90_000);
        assert_eq!(frame.duration, 3_000);
        assert_eq!(frame.data(), b"nal");
    }

    #[test]
    fn header_only_frame_has_empty_body() {
        let frame = VideoFrame::parse(InboundPayload::Direct(encoded(1, 2, b""))).unwrap();
        assert!(frame.data().is_empty());
    }

    #[test]
    fn short_payload_is_rejected() {
        let err = VideoFrame::parse(InboundPayload::Direct(Bytes::from_static(&[0u8; 15])))
            .unwrap_err();
        assert!(matches!(
            err,
            FrameError::TruncatedVideoHeader { len: 15, needed: 16 }
        ));
    }

    #[test]
    fn rejected_pooled_payload_returns_to_pool() {
        let pool = Arc::new(
            FrameBufferPool::new(PoolConfig {
                buffer_size: 32,
                capacity: 2,
            })
            .unwrap(),
        );
        let mut buf = PooledBuffer::checkout(&pool, 4);
        buf.extend_from_slice(b"tiny");
        assert!(VideoFrame::parse(InboundPayload::Pooled(buf)).is_err());
        assert_eq!(pool.stats().outstanding, 0);
    }
}
