use std::path::PathBuf;

use telelink_frame::FrameError;
use telelink_transport::TransportError;

use crate::queue::DropPolicy;

/// Errors reported by channels and the transport facade.
///
/// Apart from construction and configuration, these never come back from a
/// method call: they are delivered as `TransportEvent::Error`.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// A command was dropped because the queue was full.
    #[error("command queue full (capacity {capacity}, {policy}): dropped {dropped_len}-byte payload")]
    QueueOverflow {
        capacity: usize,
        policy: DropPolicy,
        dropped_len: usize,
    },

    /// A connection attempt failed. The supervisor retries on its next tick.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] TransportError),

    /// Transmitting a queued command failed; the command was re-queued.
    #[error("send failed: {0}")]
    SendFailed(#[source] TransportError),

    /// Transmitting a keepalive failed.
    #[error("keepalive failed: {0}")]
    KeepaliveFailed(#[source] TransportError),

    /// One inbound message could not be delivered. The channel stays open.
    #[error("delivery failed: {0}")]
    Delivery(#[source] FrameError),

    /// The link reported an error.
    #[error("link error: {0}")]
    Link(String),

    /// The frame buffer pool could not be built.
    #[error("buffer pool: {0}")]
    Pool(#[from] FrameError),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A configuration file is not valid JSON for this schema.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// `start()` was called outside a tokio runtime.
    #[error("channels must be started from within a tokio runtime")]
    NoRuntime,
}

pub type Result<T> = std::result::Result<T, ChannelError>;
