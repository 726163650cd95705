//! Periodic per-channel tasks: reconnect supervision and liveness pings.
//!
//! Each active schedule is one tokio task that sleeps, runs its tick to
//! completion, and sleeps again (fixed delay, no catch-up bursts). A
//! cancelled schedule stops at its next sleep; a tick already running is
//! allowed to finish so channel state is never left half-updated.

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// A cancellable fixed-delay task. At most one runs per schedule.
#[derive(Debug)]
pub struct Schedule {
    name: &'static str,
    interval: Duration,
    token: Mutex<Option<CancellationToken>>,
}

impl Schedule {
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self {
            name,
            interval,
            token: Mutex::new(None),
        }
    }

    fn token(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking after `initial_delay`, then every `interval` after the
    /// previous tick completed. Returns `false` (and does nothing) if the
    /// schedule is already active.
    ///
    /// A tick returning [`ControlFlow::Break`] ends the schedule.
    pub fn activate<F, Fut>(&self, runtime: &Handle, initial_delay: Duration, mut tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let mut slot = self.token();
        if slot.as_ref().is_some_and(|token| !token.is_cancelled()) {
            return false;
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());
        drop(slot);

        let name = self.name;
        let interval = self.interval;
        runtime.spawn(async move {
            let mut delay = initial_delay;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                if tick().await.is_break() {
                    break;
                }
                delay = interval;
            }
            token.cancel();
            trace!(schedule = name, "schedule ended");
        });
        trace!(schedule = name, ?interval, "schedule activated");
        true
    }

    /// Cancel the schedule. Returns `false` if it was not active.
    pub fn deactivate(&self) -> bool {
        match self.token().take() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                trace!(schedule = self.name, "schedule deactivated");
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.token()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }
}

/// Something the [`ReconnectSupervisor`] can bring back up.
#[async_trait]
pub trait Reconnect: Send + Sync + 'static {
    /// Whether a connection attempt is wanted right now.
    fn needs_connect(&self) -> bool;

    /// Make one connection attempt.
    async fn reconnect(self: Arc<Self>);
}

/// Re-establishes a channel at a fixed interval while it is disconnected.
///
/// The first check runs immediately on activation. Because each attempt is
/// awaited inside the tick, attempts from one supervisor never overlap.
#[derive(Debug)]
pub struct ReconnectSupervisor {
    schedule: Schedule,
}

impl ReconnectSupervisor {
    pub fn new(interval: Duration) -> Self {
        Self {
            schedule: Schedule::new("reconnect", interval),
        }
    }

    pub fn activate<T: Reconnect>(&self, runtime: &Handle, target: Weak<T>) -> bool {
        self.schedule.activate(runtime, Duration::ZERO, move || {
            let target = target.clone();
            async move {
                let Some(target) = target.upgrade() else {
                    return ControlFlow::Break(());
                };
                if target.needs_connect() {
                    target.reconnect().await;
                }
                ControlFlow::Continue(())
            }
        })
    }

    pub fn deactivate(&self) -> bool {
        self.schedule.deactivate()
    }

    pub fn is_active(&self) -> bool {
        self.schedule.is_active()
    }

    pub fn interval(&self) -> Duration {
        self.schedule.interval()
    }
}

/// Something the [`LivenessTimer`] keeps alive.
#[async_trait]
pub trait Keepalive: Send + Sync + 'static {
    async fn keepalive(&self);
}

/// Sends a keepalive every interval while a channel is connected.
#[derive(Debug)]
pub struct LivenessTimer {
    schedule: Schedule,
}

impl LivenessTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            schedule: Schedule::new("liveness", interval),
        }
    }

    /// First keepalive goes out one interval after activation.
    pub fn activate<T: Keepalive>(&self, runtime: &Handle, target: Weak<T>) -> bool {
        let interval = self.schedule.interval();
        self.schedule.activate(runtime, interval, move || {
            let target = target.clone();
            async move {
                let Some(target) = target.upgrade() else {
                    return ControlFlow::Break(());
                };
                target.keepalive().await;
                ControlFlow::Continue(())
            }
        })
    }

    pub fn deactivate(&self) -> bool {
        self.schedule.deactivate()
    }

    pub fn is_active(&self) -> bool {
        self.schedule.is_active()
    }
}
