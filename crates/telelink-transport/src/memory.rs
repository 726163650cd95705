//! In-process connector for tests and demos.
//!
//! Every endpoint path gets its own scripted state. The inspection and
//! injection hooks (`sent`, `attempts`, `push_fragment`, `close_remote`, ...)
//! are plain public methods, so tests never reach into private fields.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::traits::{CloseInfo, Connector, Link, LinkEvent, OpenLink, LINK_EVENT_CAPACITY};

#[derive(Default)]
struct PathState {
    fail_next: usize,
    refusing: bool,
    fail_sends: usize,
    attempts: Vec<Instant>,
    sent: Vec<Bytes>,
    pings: usize,
    opened: usize,
    current: Option<Arc<LinkShared>>,
}

struct LinkShared {
    events: mpsc::Sender<LinkEvent>,
    open: AtomicBool,
}

#[derive(Default)]
struct Inner {
    paths: Mutex<HashMap<String, PathState>>,
    open_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Inner {
    fn paths(&self) -> MutexGuard<'_, HashMap<String, PathState>> {
        // A panicking test thread must not wedge every other hook.
        self.paths.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Scripted in-memory [`Connector`].
#[derive(Clone, Default)]
pub struct MemoryConnector {
    inner: Arc<Inner>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` connection attempts to `path` fail.
    pub fn fail_next(&self, path: &str, count: usize) {
        self.inner.paths().entry(path.to_string()).or_default().fail_next = count;
    }

    /// Refuse every connection attempt to `path` until cleared.
    pub fn set_refusing(&self, path: &str, refusing: bool) {
        self.inner.paths().entry(path.to_string()).or_default().refusing = refusing;
    }

    /// Make the next `count` sends on `path` fail without closing the link.
    pub fn fail_sends(&self, path: &str, count: usize) {
        self.inner.paths().entry(path.to_string()).or_default().fail_sends = count;
    }

    /// Delay every connection attempt (simulated handshake latency).
    pub fn set_open_delay(&self, delay: Duration) {
        *self
            .inner
            .open_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = delay;
    }

    /// Start times of every connection attempt to `path`.
    pub fn attempts(&self, path: &str) -> Vec<Instant> {
        self.inner
            .paths()
            .get(path)
            .map(|state| state.attempts.clone())
            .unwrap_or_default()
    }

    /// Number of successfully opened links to `path`.
    pub fn opened(&self, path: &str) -> usize {
        self.inner.paths().get(path).map_or(0, |state| state.opened)
    }

    /// Payloads successfully sent to `path`, across all links, in order.
    pub fn sent(&self, path: &str) -> Vec<Bytes> {
        self.inner
            .paths()
            .get(path)
            .map(|state| state.sent.clone())
            .unwrap_or_default()
    }

    /// Protocol-level pings sent to `path`.
    pub fn pings(&self, path: &str) -> usize {
        self.inner.paths().get(path).map_or(0, |state| state.pings)
    }

    /// Whether `path` currently has an open link.
    pub fn is_connected(&self, path: &str) -> bool {
        self.inner
            .paths()
            .get(path)
            .and_then(|state| state.current.as_ref())
            .is_some_and(|link| link.open.load(Ordering::SeqCst))
    }

    /// Highest number of connection attempts that were ever in flight at once.
    pub fn max_concurrent_opens(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    /// Deliver an inbound fragment on the current link to `path`.
    ///
    /// Returns `false` if there is no open link or its event queue is full.
    pub fn push_fragment(&self, path: &str, data: impl Into<Bytes>, last: bool) -> bool {
        self.push(
            path,
            LinkEvent::Fragment {
                data: data.into(),
                last,
            },
        )
    }

    /// Deliver a complete inbound message on the current link to `path`.
    pub fn push_message(&self, path: &str, data: impl Into<Bytes>) -> bool {
        self.push_fragment(path, data, true)
    }

    /// Deliver an inbound text message on the current link to `path`.
    pub fn push_text(&self, path: &str, text: impl Into<String>) -> bool {
        self.push(path, LinkEvent::Text(text.into()))
    }

    /// Report a link-level error on the current link without closing it.
    pub fn push_error(&self, path: &str, message: impl Into<String>) -> bool {
        self.push(path, LinkEvent::Error(message.into()))
    }

    /// Close the current link to `path` as if the remote end hung up.
    pub fn close_remote(&self, path: &str, code: Option<u16>, reason: &str) -> bool {
        let current = self
            .inner
            .paths()
            .get_mut(path)
            .and_then(|state| state.current.take());
        match current {
            Some(link) if link.open.swap(false, Ordering::SeqCst) => link
                .events
                .try_send(LinkEvent::Closed(CloseInfo::remote(code, reason)))
                .is_ok(),
            _ => false,
        }
    }

    fn push(&self, path: &str, event: LinkEvent) -> bool {
        let current = self
            .inner
            .paths()
            .get(path)
            .and_then(|state| state.current.clone());
        match current {
            Some(link) if link.open.load(Ordering::SeqCst) => link.events.try_send(event).is_ok(),
            _ => false,
        }
    }
}

impl std::fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let paths: Vec<String> = self.inner.paths().keys().cloned().collect();
        f.debug_struct("MemoryConnector")
            .field("paths", &paths)
            .finish()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<OpenLink> {
        let path = endpoint.path().to_string();
        let started = Instant::now();
        let in_flight = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let delay = *self
            .inner
            .open_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = {
            let mut paths = self.inner.paths();
            let state = paths.entry(path.clone()).or_default();
            state.attempts.push(started);

            if state.refusing || state.fail_next > 0 {
                state.fail_next = state.fail_next.saturating_sub(1);
                Err(TransportError::Refused {
                    endpoint: endpoint.url(),
                    reason: "scripted failure".to_string(),
                })
            } else {
                let (tx, rx) = mpsc::channel(LINK_EVENT_CAPACITY);
                let shared = Arc::new(LinkShared {
                    events: tx,
                    open: AtomicBool::new(true),
                });
                state.opened += 1;
                state.current = Some(Arc::clone(&shared));
                debug!(path = %path, "memory link opened");
                Ok(OpenLink {
                    link: Box::new(MemoryLink {
                        path: path.clone(),
                        shared,
                        inner: Arc::clone(&self.inner),
                    }),
                    events: rx,
                })
            }
        };

        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryLink {
    path: String,
    shared: Arc<LinkShared>,
    inner: Arc<Inner>,
}

#[async_trait]
impl Link for MemoryLink {
    async fn send(&self, payload: Bytes) -> Result<()> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let mut paths = self.inner.paths();
        let state = paths.entry(self.path.clone()).or_default();
        if state.fail_sends > 0 {
            state.fail_sends -= 1;
            return Err(TransportError::Send("scripted send failure".to_string()));
        }
        state.sent.push(payload);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.inner
            .paths()
            .entry(self.path.clone())
            .or_default()
            .pings += 1;
        Ok(())
    }

    async fn close(&self) {
        if self.shared.open.swap(false, Ordering::SeqCst) {
            let _ = self
                .shared
                .events
                .try_send(LinkEvent::Closed(CloseInfo::local("client closing")));
        }
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }
}
