//! Inbound payload handling for telelink.
//!
//! - [`FrameBufferPool`]: fixed-size reusable buffers, lock-free acquire/release
//! - [`Reassembler`]: joins fragmented messages, zero-copy for whole ones
//! - [`InboundPayload`]: what callers receive, either the network buffer
//!   itself or a pooled copy that goes back to the pool on drop
//! - [`VideoFrame`]: the 16-byte timestamp/duration header on video payloads

pub mod error;
pub mod payload;
pub mod pool;
pub mod reassembly;
pub mod video;

pub use error::{FrameError, Result};
pub use payload::{InboundPayload, PooledBuffer};
pub use pool::{FrameBufferPool, PoolConfig, PoolStats, DEFAULT_BUFFER_SIZE, DEFAULT_POOL_CAPACITY};
pub use reassembly::Reassembler;
pub use video::{VideoFrame, VIDEO_HEADER_LEN};
