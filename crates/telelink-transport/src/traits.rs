use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::endpoint::Endpoint;
use crate::error::Result;

/// Capacity of the per-link event queue. A full queue stalls the reader,
/// which pushes back on the remote sender instead of buffering without bound.
pub const LINK_EVENT_CAPACITY: usize = 256;

/// How a link ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code, when the remote sent one.
    pub code: Option<u16>,
    /// Human-readable reason.
    pub reason: String,
    /// `true` when the remote end (or the network) closed the link.
    pub remote: bool,
}

impl CloseInfo {
    /// A close initiated from this side.
    pub fn local(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
            remote: false,
        }
    }

    /// A close initiated by the remote end.
    pub fn remote(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            remote: true,
        }
    }
}

/// Something that happened on an open link, delivered in arrival order.
#[derive(Debug)]
pub enum LinkEvent {
    /// A binary fragment. `last` marks the final fragment of a message; a
    /// message that arrives whole is a single fragment with `last == true`.
    Fragment { data: Bytes, last: bool },
    /// A text message.
    Text(String),
    /// An error that did not by itself end the link.
    Error(String),
    /// The link is closed. Nothing follows this event.
    Closed(CloseInfo),
}

/// Receiving side of a link's events.
pub type LinkEvents = mpsc::Receiver<LinkEvent>;

/// An open, bidirectional, message-oriented connection.
///
/// Message boundaries are preserved: each `send` is one message on the wire.
#[async_trait]
pub trait Link: Send + Sync {
    /// Transmit one payload as a single message.
    async fn send(&self, payload: Bytes) -> Result<()>;

    /// Transmit a protocol-level keepalive.
    async fn ping(&self) -> Result<()>;

    /// Close the link. Idempotent; never fails.
    async fn close(&self);

    /// Whether the link still accepts outbound traffic.
    fn is_open(&self) -> bool;
}

/// A freshly opened link together with its event stream.
pub struct OpenLink {
    pub link: Box<dyn Link>,
    pub events: LinkEvents,
}

impl std::fmt::Debug for OpenLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenLink")
            .field("open", &self.link.is_open())
            .finish()
    }
}

/// Opens links to endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new link. Completes once the handshake has succeeded or failed.
    async fn open(&self, endpoint: &Endpoint) -> Result<OpenLink>;

    /// Connector name for diagnostics.
    fn name(&self) -> &'static str;
}
