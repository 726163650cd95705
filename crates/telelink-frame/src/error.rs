/// Errors raised while pooling or interpreting inbound payloads.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The pool configuration cannot be used.
    #[error("invalid pool configuration: {reason}")]
    InvalidPoolConfig { reason: String },

    /// A video payload is shorter than its fixed header.
    #[error("truncated video frame ({len} bytes, header needs {needed})")]
    TruncatedVideoHeader { len: usize, needed: usize },

    /// A text message arrived on a binary-only channel.
    #[error("unexpected text message ({len} bytes) on binary channel")]
    UnexpectedText { len: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
