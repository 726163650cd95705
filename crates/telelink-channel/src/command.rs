use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use telelink_transport::{Connector, Endpoint, LinkEvent};
use tracing::{debug, trace, warn};

use crate::config::TransportConfig;
use crate::error::{ChannelError, Result};
use crate::event::{ChannelRole, EventCredit, EventSink};
use crate::lifecycle::{self, Core, LinkHandler, LinkSlot};
use crate::queue::{CommandQueue, Enqueued};
use crate::scheduler::{Keepalive, LivenessTimer, Reconnect, ReconnectSupervisor};
use crate::state::ConnectionState;

/// Outbound channel: queues commands and transmits them while connected.
///
/// `send` never waits. While connected each send triggers a drain on the
/// runtime; while disconnected commands wait in the queue and go out in
/// FIFO order as soon as the next connection is up.
#[derive(Clone)]
pub struct CommandChannel {
    inner: Arc<CommandInner>,
}

struct CommandInner {
    core: Core,
    queue: CommandQueue,
    liveness: LivenessTimer,
    keepalive: Option<Bytes>,
    transmitted: AtomicU64,
}

impl CommandChannel {
    pub(crate) fn new(
        endpoint: Endpoint,
        connector: Arc<dyn Connector>,
        events: EventSink,
        config: &TransportConfig,
    ) -> Self {
        Self {
            inner: Arc::new(CommandInner {
                core: Core::new(
                    ChannelRole::Command,
                    endpoint,
                    connector,
                    events,
                    ReconnectSupervisor::new(config.reconnect_interval),
                ),
                queue: CommandQueue::new(config.queue_capacity, config.drop_policy),
                liveness: LivenessTimer::new(config.liveness_interval),
                keepalive: config.keepalive_payload.clone().map(Bytes::from),
                transmitted: AtomicU64::new(0),
            }),
        }
    }

    /// Allow connection attempts. Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        lifecycle::start(&self.inner)
    }

    /// Cancel timers, close the link, and clear the queue.
    pub async fn stop(&self) {
        lifecycle::stop(&*self.inner).await;
    }

    /// Queue a command. Returns `false` if this payload was dropped because
    /// the queue is full.
    pub fn send(&self, payload: impl Into<Bytes>) -> bool {
        let inner = &self.inner;
        let accepted = match inner.queue.push(payload.into()) {
            Enqueued::Accepted => true,
            Enqueued::EvictedOldest(old) => {
                inner.overflow(old.len());
                true
            }
            Enqueued::Rejected(new) => {
                inner.overflow(new.len());
                false
            }
        };
        if inner.core.state.get() == ConnectionState::Connected {
            if let Some(runtime) = inner.core.runtime() {
                let inner = Arc::clone(inner);
                runtime.spawn(async move { inner.drain().await });
            }
        }
        accepted
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

    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    /// Commands transmitted successfully since creation.
    pub fn transmitted(&self) -> u64 {
        self.inner.transmitted.load(Ordering::Relaxed)
    }

    /// Connection attempts made since creation.
    pub fn attempts(&self) -> u64 {
        self.inner.core.attempts()
    }

    /// Whether any reconnect or liveness timer is armed.
    pub fn timers_active(&self) -> bool {
        self.inner.core.supervisor.is_active() || self.inner.liveness.is_active()
    }
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("endpoint", &self.inner.core.endpoint.url())
            .field("state", &self.state())
            .field("queue", &self.inner.queue)
            .finish()
    }
}

impl CommandInner {
    fn overflow(&self, dropped_len: usize) {
        warn!(
            channel = %self.core.role,
            capacity = self.queue.capacity(),
            policy = %self.queue.policy(),
            dropped_len,
            "command queue full; payload dropped"
        );
        self.core.report(ChannelError::QueueOverflow {
            capacity: self.queue.capacity(),
            policy: self.queue.policy(),
            dropped_len,
        });
    }

    async fn drain(&self) {
        let mut slot = self.core.link.lock().await;
        self.drain_locked(&mut slot).await;
    }

    /// Transmit queued commands in order until the queue is empty or a send
    /// fails. A failed payload goes back to the head of the queue.
    async fn drain_locked(&self, slot: &mut LinkSlot) {
        let mut sent = 0usize;
        while self.core.state.get() == ConnectionState::Connected {
            let Some(link) = slot.as_ref() else {
                break;
            };
            if !link.is_open() {
                break;
            }
            let Some(payload) = self.queue.pop() else {
                break;
            };
            match link.send(payload.clone()).await {
                Ok(()) => {
                    sent += 1;
                    self.transmitted.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    if let Some(evicted) = self.queue.requeue_front(payload) {
                        self.overflow(evicted.len());
                    }
                    warn!(channel = %self.core.role, error = %err, "command send failed; re-queued");
                    self.core.report(ChannelError::SendFailed(err));
                    lifecycle::fail_link(self, slot, "send failed").await;
                    break;
                }
            }
        }
        if sent > 0 {
            debug!(
                channel = %self.core.role,
                sent,
                queued = self.queue.len(),
                "command queue drained"
            );
        }
    }
}

#[async_trait]
impl Reconnect for CommandInner {
    fn needs_connect(&self) -> bool {
        self.core.needs_connect()
    }

    async fn reconnect(self: Arc<Self>) {
        lifecycle::connect(&self).await;
    }
}

#[async_trait]
impl Keepalive for CommandInner {
    async fn keepalive(&self) {
        let slot = self.core.link.lock().await;
        if self.core.state.get() != ConnectionState::Connected {
            return;
        }
        let Some(link) = slot.as_ref() else {
            return;
        };
        let result = match &self.keepalive {
            Some(payload) => link.send(payload.clone()).await,
            None => link.ping().await,
        };
        match result {
            Ok(()) => trace!(channel = %self.core.role, "keepalive sent"),
            Err(err) => {
                warn!(channel = %self.core.role, error = %err, "keepalive failed");
                self.core.report(ChannelError::KeepaliveFailed(err));
            }
        }
    }
}

#[async_trait]
impl LinkHandler for CommandInner {
    const DELIVERS_INBOUND: bool = false;

    fn core(&self) -> &Core {
        &self.core
    }

    async fn connected(this: &Arc<Self>, slot: &mut LinkSlot) {
        this.drain_locked(slot).await;
        if this.core.state.get() != ConnectionState::Connected {
            return;
        }
        if let Some(runtime) = this.core.runtime() {
            this.liveness.activate(&runtime, Arc::downgrade(this));
        }
    }

    fn inbound(&self, event: LinkEvent, _credit: Option<EventCredit>) {
        debug!(channel = %self.core.role, ?event, "ignoring inbound message");
    }

    fn lost(&self) {
        self.liveness.deactivate();
    }

    fn halt(&self) {
        self.liveness.deactivate();
    }

    fn stopped(&self) {
        let dropped = self.queue.clear();
        if dropped > 0 {
            debug!(channel = %self.core.role, dropped, "pending commands discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use telelink_transport::{MemoryConnector, COMMAND_PATH};

    use super::*;
    use crate::event::{EventReceiver, TransportEvent};
    use crate::queue::DropPolicy;

    fn channel(
        config: &TransportConfig,
    ) -> (CommandChannel, MemoryConnector, EventReceiver) {
        let memory = MemoryConnector::new();
        let (events, rx) = EventSink::channel(config.event_capacity);
        let channel = CommandChannel::new(
            config.command_endpoint(),
            Arc::new(memory.clone()),
            events,
            config,
        );
        (channel, memory, rx)
    }

    fn payloads(range: std::ops::RangeInclusive<u8>) -> Vec<Bytes> {
        range.map(|n| Bytes::from(vec![n])).collect()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn queued_commands_drain_in_order_on_connect() {
        let config = TransportConfig::default();
        let (channel, memory, mut rx) = channel(&config);
        memory.set_refusing(COMMAND_PATH, true);
        channel.start().unwrap();

        for payload in payloads(1..=5) {
            assert!(channel.send(payload));
        }
        settle().await;
        assert_eq!(channel.queue_len(), 5);
        assert!(memory.sent(COMMAND_PATH).is_empty());

        memory.set_refusing(COMMAND_PATH, false);
        tokio::time::sleep(config.reconnect_interval).await;

        assert!(channel.is_connected());
        assert_eq!(memory.sent(COMMAND_PATH), payloads(1..=5));
        assert_eq!(channel.queue_len(), 0);
        assert_eq!(channel.transmitted(), 5);

        let mut connected = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, TransportEvent::Connected { .. }) {
                connected += 1;
            }
        }
        assert_eq!(connected, 1);
        channel.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn send_while_connected_transmits_without_waiting_for_a_tick() {
        let (channel, memory, _rx) = channel(&TransportConfig::default());
        channel.start().unwrap();
        settle().await;
        assert!(channel.is_connected());

        channel.send(&b"now"[..]);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(memory.sent(COMMAND_PATH), vec![Bytes::from_static(b"now")]);
        channel.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_is_retransmitted_first_after_reconnect() {
        let config = TransportConfig::default();
        let (channel, memory, mut rx) = channel(&config);
        memory.set_refusing(COMMAND_PATH, true);
        channel.start().unwrap();
        for payload in payloads(1..=3) {
            channel.send(payload);
        }

        // First transmit on the new link fails: payload 1 must come back first.
        memory.set_refusing(COMMAND_PATH, false);
        memory.fail_sends(COMMAND_PATH, 1);
        tokio::time::sleep(config.reconnect_interval).await;
        tokio::time::sleep(config.reconnect_interval * 2).await;

        assert_eq!(memory.sent(COMMAND_PATH), payloads(1..=3));
        assert_eq!(memory.opened(COMMAND_PATH), 2);

        let mut send_failures = 0;
        let mut disconnects = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                TransportEvent::Error {
                    error: ChannelError::SendFailed(_),
                    ..
                } => send_failures += 1,
                TransportEvent::Disconnected { remote, .. } => {
                    assert!(!remote);
                    disconnects += 1;
                }
                _ => {}
            }
        }
        assert_eq!(send_failures, 1);
        assert_eq!(disconnects, 1);
        channel.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_drop_newest_rejects_and_reports() {
        let config = TransportConfig {
            queue_capacity: 3,
            drop_policy: DropPolicy::DropNewest,
            ..TransportConfig::default()
        };
        let (channel, memory, mut rx) = channel(&config);
        memory.set_refusing(COMMAND_PATH, true);
        channel.start().unwrap();

        for payload in payloads(1..=3) {
            assert!(channel.send(payload));
        }
        assert!(!channel.send(&b"\x04"[..]));
        assert_eq!(channel.queue_len(), 3);

        let overflow = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|event| {
                matches!(
                    event,
                    TransportEvent::Error {
                        error: ChannelError::QueueOverflow { .. },
                        ..
                    }
                )
            })
            .count();
        assert_eq!(overflow, 1);

        memory.set_refusing(COMMAND_PATH, false);
        tokio::time::sleep(config.reconnect_interval * 2).await;
        assert_eq!(memory.sent(COMMAND_PATH), payloads(1..=3));
        channel.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_drop_oldest_keeps_newest() {
        let config = TransportConfig {
            queue_capacity: 3,
            drop_policy: DropPolicy::DropOldest,
            ..TransportConfig::default()
        };
        let (channel, memory, _rx) = channel(&config);
        memory.set_refusing(COMMAND_PATH, true);
        channel.start().unwrap();

        for payload in payloads(1..=4) {
            assert!(channel.send(payload));
        }
        assert_eq!(channel.queue_len(), 3);

        memory.set_refusing(COMMAND_PATH, false);
        tokio::time::sleep(config.reconnect_interval * 2).await;
        assert_eq!(memory.sent(COMMAND_PATH), payloads(2..=4));
        channel.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_pings_while_connected_only() {
        let config = TransportConfig::default();
        let (channel, memory, _rx) = channel(&config);
        channel.start().unwrap();
        settle().await;

        tokio::time::sleep(config.liveness_interval * 3).await;
        let pings = memory.pings(COMMAND_PATH);
        assert!((2..=3).contains(&pings), "pings: {pings}");

        memory.set_refusing(COMMAND_PATH, true);
        memory.close_remote(COMMAND_PATH, Some(1006), "gone");
        settle().await;
        assert!(!channel.is_connected());

        tokio::time::sleep(config.liveness_interval * 5).await;
        assert_eq!(memory.pings(COMMAND_PATH), pings);
        channel.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn configured_keepalive_payload_replaces_ping() {
        let config = TransportConfig {
            keepalive_payload: Some(vec![0xAA]),
            ..TransportConfig::default()
        };
        let (channel, memory, _rx) = channel(&config);
        channel.start().unwrap();
        settle().await;
        tokio::time::sleep(config.liveness_interval).await;

        assert_eq!(memory.pings(COMMAND_PATH), 0);
        assert_eq!(memory.sent(COMMAND_PATH), vec![Bytes::from_static(&[0xAA])]);
        channel.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_clears_everything() {
        let (channel, memory, mut rx) = channel(&TransportConfig::default());
        channel.start().unwrap();
        settle().await;
        assert!(channel.timers_active());

        memory.set_refusing(COMMAND_PATH, true);
        channel.stop().await;
        assert!(!channel.is_connected());
        assert!(!channel.timers_active());
        assert!(!memory.is_connected(COMMAND_PATH));
        channel.stop().await;

        let disconnects = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|event| matches!(event, TransportEvent::Disconnected { remote: false, .. }))
            .count();
        assert_eq!(disconnects, 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(memory.attempts(COMMAND_PATH).len(), 1);
    }

    #[tokio::test]
    async fn stop_without_start_is_harmless() {
        let (channel, _memory, _rx) = channel(&TransportConfig::default());
        channel.stop().await;
        assert!(!channel.timers_active());
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }
}
