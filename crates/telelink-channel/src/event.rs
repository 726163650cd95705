use std::fmt;
use std::sync::Arc;

use telelink_frame::{InboundPayload, VideoFrame};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::ChannelError;

/// Which logical channel an event came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelRole {
    Command,
    State,
    Video(String),
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => f.write_str("command"),
            Self::State => f.write_str("state"),
            Self::Video(stream) => write!(f, "video:{stream}"),
        }
    }
}

/// Everything a transport reports to its owner, in one stream.
#[derive(Debug)]
pub enum TransportEvent {
    /// A channel finished its handshake.
    Connected { channel: ChannelRole, endpoint: String },
    /// A connected channel went down. `remote` is `false` for local closes
    /// (stop, send failure).
    Disconnected {
        channel: ChannelRole,
        code: Option<u16>,
        reason: String,
        remote: bool,
    },
    /// A recoverable problem. The channel keeps running.
    Error {
        channel: ChannelRole,
        error: ChannelError,
    },
    /// One telemetry/state message.
    Telemetry(InboundPayload),
    /// One video frame. Dropping it returns any pooled buffer.
    VideoFrame { stream: String, frame: VideoFrame },
}

impl TransportEvent {
    /// The channel this event belongs to.
    pub fn channel(&self) -> ChannelRole {
        match self {
            Self::Connected { channel, .. }
            | Self::Disconnected { channel, .. }
            | Self::Error { channel, .. } => channel.clone(),
            Self::Telemetry(_) => ChannelRole::State,
            Self::VideoFrame { stream, .. } => ChannelRole::Video(stream.clone()),
        }
    }
}

struct Queued {
    event: TransportEvent,
    _credit: Option<OwnedSemaphorePermit>,
}

/// Receiving end handed out by `Transport::new`.
///
/// Every event produced from inbound traffic holds one unit of the
/// transport's event capacity until it is received. Once the capacity is
/// used up the inbound channels stop reading their links, so a slow consumer
/// pushes back on the remote sender. Connection events never wait.
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<Queued>,
    credits: Arc<Semaphore>,
    capacity: usize,
}

impl EventReceiver {
    /// Wait for the next event. `None` once every channel has been dropped.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await.map(|queued| queued.event)
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Result<TransportEvent, TryRecvError> {
        self.rx.try_recv().map(|queued| queued.event)
    }

    /// Inbound events queued and not yet received.
    pub fn pending_inbound(&self) -> usize {
        self.capacity.saturating_sub(self.credits.available_permits())
    }

    /// Most inbound events that can be queued at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Debug for EventReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventReceiver")
            .field("capacity", &self.capacity)
            .field("pending_inbound", &self.pending_inbound())
            .finish()
    }
}

impl Drop for EventReceiver {
    fn drop(&mut self) {
        // Wakes inbound pumps waiting for room that will never come.
        self.credits.close();
    }
}

/// Room for one inbound event, reserved before the link is read further.
#[derive(Debug)]
pub(crate) struct EventCredit(OwnedSemaphorePermit);

/// Sending side shared by every channel of one transport. Never blocks.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::UnboundedSender<Queued>,
    credits: Arc<Semaphore>,
}

impl EventSink {
    pub(crate) fn channel(capacity: usize) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let credits = Arc::new(Semaphore::new(capacity));
        (
            Self {
                tx,
                credits: Arc::clone(&credits),
            },
            EventReceiver {
                rx,
                credits,
                capacity,
            },
        )
    }

    /// Deliver a connection event. If the receiver is gone it is dropped.
    pub(crate) fn emit(&self, event: TransportEvent) {
        let _ = self.tx.send(Queued {
            event,
            _credit: None,
        });
    }

    /// Wait until the receiver has room for one more inbound event.
    /// `None` once the receiver is dropped.
    pub(crate) async fn reserve(&self) -> Option<EventCredit> {
        Arc::clone(&self.credits)
            .acquire_owned()
            .await
            .ok()
            .map(EventCredit)
    }

    /// Deliver an inbound event using room reserved earlier.
    pub(crate) fn deliver(&self, credit: Option<EventCredit>, event: TransportEvent) {
        let _ = self.tx.send(Queued {
            event,
            _credit: credit.map(|credit| credit.0),
        });
    }
}

impl fmt::Debug for Queued {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.event.fmt(f)
    }
}
