use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use telelink_frame::{FrameBufferPool, FrameError, InboundPayload, Reassembler, VideoFrame};
use telelink_transport::{Connector, Endpoint, LinkEvent};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::config::TransportConfig;
use crate::error::{ChannelError, Result};
use crate::event::{ChannelRole, EventCredit, EventSink, TransportEvent};
use crate::lifecycle::{self, Core, LinkHandler, LinkSlot};
use crate::scheduler::{Reconnect, ReconnectSupervisor, Schedule};
use crate::state::ConnectionState;

/// What an inbound channel carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamKind {
    /// Opaque telemetry/state messages.
    Telemetry,
    /// Video frames with a timing header, for the named stream.
    Video(String),
}

/// Inbound traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InboundStats {
    pub messages: u64,
    pub bytes: u64,
    pub fragments: u64,
    pub fragmented_messages: u64,
    pub delivery_errors: u64,
}

#[derive(Default)]
struct Counters {
    messages: AtomicU64,
    bytes: AtomicU64,
    fragments: AtomicU64,
    fragmented_messages: AtomicU64,
    delivery_errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> InboundStats {
        InboundStats {
            messages: self.messages.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            fragments: self.fragments.load(Ordering::Relaxed),
            fragmented_messages: self.fragmented_messages.load(Ordering::Relaxed),
            delivery_errors: self.delivery_errors.load(Ordering::Relaxed),
        }
    }
}

/// Inbound channel: receives telemetry or video and forwards it as events.
///
/// Whole messages are forwarded zero-copy. Fragmented ones are reassembled
/// and handed over in a pooled buffer that returns to the pool when the
/// receiver drops it. Nothing is ever sent on this channel.
#[derive(Clone)]
pub struct StateChannel {
    inner: Arc<InboundInner>,
}

struct InboundInner {
    core: Core,
    kind: StreamKind,
    reassembler: Mutex<Reassembler>,
    counters: Counters,
    stats_timer: Schedule,
}

impl StateChannel {
    pub(crate) fn new(
        kind: StreamKind,
        endpoint: Endpoint,
        connector: Arc<dyn Connector>,
        events: EventSink,
        pool: Arc<FrameBufferPool>,
        config: &TransportConfig,
    ) -> Self {
        let role = match &kind {
            StreamKind::Telemetry => ChannelRole::State,
            StreamKind::Video(stream) => ChannelRole::Video(stream.clone()),
        };
        let initial_capacity = pool.buffer_size();
        Self {
            inner: Arc::new(InboundInner {
                core: Core::new(
                    role,
                    endpoint,
                    connector,
                    events,
                    ReconnectSupervisor::new(config.reconnect_interval),
                ),
                kind,
                reassembler: Mutex::new(Reassembler::new(pool, initial_capacity)),
                counters: Counters::default(),
                stats_timer: Schedule::new("inbound-stats", config.stats_interval),
            }),
        }
    }

    /// Allow connection attempts. Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        lifecycle::start(&self.inner)
    }

    /// Cancel timers, close the link, and drop any partial message.
    pub async fn stop(&self) {
        lifecycle::stop(&*self.inner).await;
    }

    pub fn kind(&self) -> &StreamKind {
        &self.inner.kind
    }

    pub fn role(&self) -> &ChannelRole {
        &self.inner.core.role
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.core.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.core.endpoint
    }

    pub fn stats(&self) -> InboundStats {
        self.inner.counters.snapshot()
    }

    /// Connection attempts made since creation.
    pub fn attempts(&self) -> u64 {
        self.inner.core.attempts()
    }

    /// Whether any reconnect or statistics timer is armed.
    pub fn timers_active(&self) -> bool {
        self.inner.core.supervisor.is_active() || self.inner.stats_timer.is_active()
    }
}

impl fmt::Debug for StateChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateChannel")
            .field("kind", &self.inner.kind)
            .field("endpoint", &self.inner.core.endpoint.url())
            .field("state", &self.state())
            .finish()
    }
}

impl InboundInner {
    fn reassembler(&self) -> MutexGuard<'_, Reassembler> {
        self.reassembler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn deliver(&self, payload: InboundPayload, credit: Option<EventCredit>) {
        self.counters.messages.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes
            .fetch_add(payload.len() as u64, Ordering::Relaxed);
        if payload.is_pooled() {
            self.counters
                .fragmented_messages
                .fetch_add(1, Ordering::Relaxed);
        }

        let event = match &self.kind {
            StreamKind::Telemetry => TransportEvent::Telemetry(payload),
            StreamKind::Video(stream) => match VideoFrame::parse(payload) {
                Ok(frame) => TransportEvent::VideoFrame {
                    stream: stream.clone(),
                    frame,
                },
                Err(err) => return self.delivery_failed(err, credit),
            },
        };
        self.core.events.deliver(credit, event);
    }

    fn delivery_failed(&self, err: FrameError, credit: Option<EventCredit>) {
        self.counters.delivery_errors.fetch_add(1, Ordering::Relaxed);
        warn!(channel = %self.core.role, error = %err, "inbound message dropped");
        self.core.events.deliver(
            credit,
            TransportEvent::Error {
                channel: self.core.role.clone(),
                error: ChannelError::Delivery(err),
            },
        );
    }

    fn log_stats(&self) {
        let stats = self.counters.snapshot();
        debug!(
            channel = %self.core.role,
            state = %self.core.state.get(),
            messages = stats.messages,
            bytes = stats.bytes,
            fragmented = stats.fragmented_messages,
            errors = stats.delivery_errors,
            "inbound statistics"
        );
    }
}

#[async_trait]
impl Reconnect for InboundInner {
    fn needs_connect(&self) -> bool {
        self.core.needs_connect()
    }

    async fn reconnect(self: Arc<Self>) {
        lifecycle::connect(&self).await;
    }
}

#[async_trait]
impl LinkHandler for InboundInner {
    const DELIVERS_INBOUND: bool = true;

    fn core(&self) -> &Core {
        &self.core
    }

    async fn connected(this: &Arc<Self>, _slot: &mut LinkSlot) {
        this.reassembler().reset();
    }

    fn inbound(&self, event: LinkEvent, credit: Option<EventCredit>) {
        match event {
            LinkEvent::Fragment { data, last } => {
                self.counters.fragments.fetch_add(1, Ordering::Relaxed);
                let complete = self.reassembler().push(data, last);
                if let Some(payload) = complete {
                    self.deliver(payload, credit);
                }
            }
            LinkEvent::Text(text) => {
                self.delivery_failed(FrameError::UnexpectedText { len: text.len() }, credit);
            }
            LinkEvent::Error(_) | LinkEvent::Closed(_) => {}
        }
    }

    fn lost(&self) {
        self.reassembler().reset();
    }

    fn halt(&self) {
        self.stats_timer.deactivate();
    }

    fn stopped(&self) {
        self.reassembler().reset();
        self.log_stats();
    }

    fn started(this: &Arc<Self>, runtime: &Handle) {
        let target = Arc::downgrade(this);
        let interval = this.stats_timer.interval();
        this.stats_timer.activate(runtime, interval, move || {
            let target = target.clone();
            async move {
                match target.upgrade() {
                    Some(inner) => {
                        inner.log_stats();
                        ControlFlow::Continue(())
                    }
                    None => ControlFlow::Break(()),
                }
            }
        });
    }
}
