/// Errors that can occur in link operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The endpoint could not be turned into a connectable URL.
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// Failed to open a connection to the specified endpoint.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },

    /// The connection attempt did not complete in time.
    #[error("connect to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout {
        endpoint: String,
        timeout: std::time::Duration,
    },

    /// The connection was refused by a scripted or in-process peer.
    #[error("connection refused by {endpoint}: {reason}")]
    Refused { endpoint: String, reason: String },

    /// Transmitting a payload on an open link failed.
    #[error("send failed: {0}")]
    Send(String),

    /// The link has already been closed.
    #[error("link closed")]
    Closed,
}

impl TransportError {
    pub(crate) fn connect(
        endpoint: impl Into<String>,
        err: tokio_tungstenite::tungstenite::Error,
    ) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            source: Box::new(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
