//! Lifecycle shared by every channel: start, connect, link pump, stop.
//!
//! The link slot is guarded by one async mutex. Closing the old link and
//! opening the new one happen under that lock, so a channel never has two
//! live links or two attempts in flight. Every installed link gets a fresh
//! epoch; events from a link whose epoch is no longer current are ignored,
//! and the task reading a superseded link is cancelled.
//!
//! Each inbound fragment waits for room in the transport's event queue
//! before it is handled, so a consumer that falls behind stalls the link
//! reader instead of growing the queue.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use async_trait::async_trait;
use telelink_transport::{CloseInfo, Connector, Endpoint, Link, LinkEvent, LinkEvents, OpenLink};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ChannelError, Result};
use crate::event::{ChannelRole, EventCredit, EventSink, TransportEvent};
use crate::scheduler::{Reconnect, ReconnectSupervisor};
use crate::state::{ConnectionState, StateCell};

pub(crate) type LinkSlot = Option<Box<dyn Link>>;

pub(crate) struct Core {
    pub(crate) role: ChannelRole,
    pub(crate) endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    pub(crate) state: StateCell,
    running: AtomicBool,
    pub(crate) link: Mutex<LinkSlot>,
    epoch: AtomicU64,
    superseded: StdMutex<CancellationToken>,
    pub(crate) events: EventSink,
    runtime: StdMutex<Option<Handle>>,
    pub(crate) supervisor: ReconnectSupervisor,
    attempts: AtomicU64,
}

impl Core {
    pub(crate) fn new(
        role: ChannelRole,
        endpoint: Endpoint,
        connector: Arc<dyn Connector>,
        events: EventSink,
        supervisor: ReconnectSupervisor,
    ) -> Self {
        Self {
            role,
            endpoint,
            connector,
            state: StateCell::new(),
            running: AtomicBool::new(false),
            link: Mutex::new(None),
            epoch: AtomicU64::new(0),
            superseded: StdMutex::new(CancellationToken::new()),
            events,
            runtime: StdMutex::new(None),
            supervisor,
            attempts: AtomicU64::new(0),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn needs_connect(&self) -> bool {
        self.is_running() && self.state.get() == ConnectionState::Disconnected
    }

    pub(crate) fn runtime(&self) -> Option<Handle> {
        self.runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Retire the current link: bump the epoch and cancel its reader.
    fn next_epoch(&self) -> u64 {
        let retired = std::mem::replace(
            &mut *self
                .superseded
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            CancellationToken::new(),
        );
        retired.cancel();
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn superseded(&self) -> CancellationToken {
        self.superseded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn report(&self, error: ChannelError) {
        self.events.emit(TransportEvent::Error {
            channel: self.role.clone(),
            error,
        });
    }

    fn report_disconnected(&self, info: CloseInfo) {
        self.events.emit(TransportEvent::Disconnected {
            channel: self.role.clone(),
            code: info.code,
            reason: info.reason,
            remote: info.remote,
        });
    }
}

/// Role-specific behaviour plugged into the shared lifecycle.
#[async_trait]
pub(crate) trait LinkHandler: Reconnect + Sized {
    /// Whether inbound messages become events and so need queue room.
    const DELIVERS_INBOUND: bool;

    fn core(&self) -> &Core;

    /// A link was just installed and `Connected` emitted. The link lock is held.
    async fn connected(this: &Arc<Self>, slot: &mut LinkSlot);

    /// An inbound fragment or text message from the current link, with the
    /// event queue room reserved for it. `credit` is `None` only when nobody
    /// is receiving events any more.
    fn inbound(&self, event: LinkEvent, credit: Option<EventCredit>);

    /// The current link went away while connected.
    fn lost(&self);

    /// Cancel role timers. May run more than once per stop.
    fn halt(&self);

    /// Clear role state once the link is closed during stop.
    fn stopped(&self);

    /// Arm role timers that live as long as the channel is started.
    fn started(_this: &Arc<Self>, _runtime: &Handle) {}
}

/// Allow connection attempts. The supervisor makes the first one right away.
pub(crate) fn start<H: LinkHandler>(this: &Arc<H>) -> Result<()> {
    let runtime = Handle::try_current().map_err(|_| ChannelError::NoRuntime)?;
    let core = this.core();
    *core
        .runtime
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(runtime.clone());
    if core.running.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    core.supervisor.activate(&runtime, Arc::downgrade(this));
    H::started(this, &runtime);
    info!(channel = %core.role, endpoint = %core.endpoint, "channel started");
    Ok(())
}

/// One connection attempt: close the old link, open a new one.
pub(crate) async fn connect<H: LinkHandler>(this: &Arc<H>) {
    let core = this.core();
    let mut slot = core.link.lock().await;
    if !core.is_running()
        || !core
            .state
            .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
    {
        return;
    }

    core.next_epoch();
    if let Some(old) = slot.take() {
        old.close().await;
    }

    let attempt = core.attempts.fetch_add(1, Ordering::Relaxed) + 1;
    debug!(channel = %core.role, endpoint = %core.endpoint, attempt, "connecting");

    match core.connector.open(&core.endpoint).await {
        Ok(OpenLink { link, events }) => {
            if !core.is_running() {
                link.close().await;
                core.state
                    .transition(ConnectionState::Connecting, ConnectionState::Disconnected);
                return;
            }
            let epoch = core.next_epoch();
            *slot = Some(link);
            core.state
                .transition(ConnectionState::Connecting, ConnectionState::Connected);
            info!(channel = %core.role, endpoint = %core.endpoint, attempt, "connected");
            core.events.emit(TransportEvent::Connected {
                channel: core.role.clone(),
                endpoint: core.endpoint.url(),
            });
            tokio::spawn(pump(
                Arc::downgrade(this),
                epoch,
                events,
                core.events.clone(),
                core.superseded(),
            ));
            H::connected(this, &mut *slot).await;
        }
        Err(err) => {
            core.state
                .transition(ConnectionState::Connecting, ConnectionState::Disconnected);
            warn!(
                channel = %core.role,
                endpoint = %core.endpoint,
                attempt,
                error = %err,
                "connect failed"
            );
            core.report(ChannelError::ConnectFailed(err));
        }
    }
}

/// Read one link's events until it closes or is superseded.
async fn pump<H: LinkHandler>(
    target: Weak<H>,
    epoch: u64,
    mut events: LinkEvents,
    sink: EventSink,
    superseded: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = superseded.cancelled() => return,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            break;
        };
        let credit = match event {
            LinkEvent::Fragment { .. } | LinkEvent::Text(_) if H::DELIVERS_INBOUND => {
                tokio::select! {
                    _ = superseded.cancelled() => return,
                    credit = sink.reserve() => credit,
                }
            }
            _ => None,
        };
        let Some(this) = target.upgrade() else {
            return;
        };
        let core = this.core();
        if core.epoch() != epoch {
            return;
        }
        match event {
            LinkEvent::Closed(info) => {
                link_lost(&*this, epoch, info);
                return;
            }
            LinkEvent::Error(message) => {
                warn!(channel = %core.role, error = %message, "link error");
                core.report(ChannelError::Link(message));
            }
            inbound => this.inbound(inbound, credit),
        }
    }
    if let Some(this) = target.upgrade() {
        link_lost(&*this, epoch, CloseInfo::remote(None, "link ended"));
    }
}

fn link_lost<H: LinkHandler>(this: &H, epoch: u64, info: CloseInfo) {
    let core = this.core();
    if core.epoch() != epoch
        || !core
            .state
            .transition(ConnectionState::Connected, ConnectionState::Disconnected)
    {
        return;
    }
    this.lost();
    if info.remote {
        warn!(
            channel = %core.role,
            code = ?info.code,
            reason = %info.reason,
            "link closed by remote"
        );
    } else {
        info!(channel = %core.role, reason = %info.reason, "link closed");
    }
    core.report_disconnected(info);
}

/// Drop the current link after a failed transmit. Caller holds the link lock.
pub(crate) async fn fail_link<H: LinkHandler>(this: &H, slot: &mut LinkSlot, reason: &str) {
    let core = this.core();
    core.next_epoch();
    if let Some(link) = slot.take() {
        link.close().await;
    }
    if core
        .state
        .transition(ConnectionState::Connected, ConnectionState::Disconnected)
    {
        this.lost();
        warn!(channel = %core.role, reason, "link dropped");
        core.report_disconnected(CloseInfo::local(reason));
    }
}

/// Stop the channel. Idempotent; safe whatever the current state.
pub(crate) async fn stop<H: LinkHandler>(this: &H) {
    let core = this.core();
    let was_running = core.running.swap(false, Ordering::SeqCst);
    core.supervisor.deactivate();
    this.halt();

    let mut slot = core.link.lock().await;
    // An attempt that was in flight above may have re-armed role timers.
    this.halt();
    core.next_epoch();
    if let Some(link) = slot.take() {
        link.close().await;
    }
    let previous = core.state.reset();
    this.stopped();
    drop(slot);

    if previous == ConnectionState::Connected {
        info!(channel = %core.role, "channel stopped");
        core.report_disconnected(CloseInfo::local("stopped"));
    } else if was_running {
        debug!(channel = %core.role, "channel stopped while not connected");
    }
}
