use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Which payload gives way when the command queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Reject the payload being enqueued. `push` never evicts queued
    /// commands, though [`CommandQueue::requeue_front`] can.
    #[default]
    DropNewest,
    /// Evict the head of the queue to make room.
    DropOldest,
}

impl fmt::Display for DropPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DropNewest => "drop_newest",
            Self::DropOldest => "drop_oldest",
        })
    }
}

/// Result of [`CommandQueue::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    Accepted,
    /// The payload was queued and this older one was evicted.
    EvictedOldest(Bytes),
    /// The queue was full and the payload was not queued.
    Rejected(Bytes),
}

/// Bounded FIFO of pending command payloads, safe for many producers and
/// consumers.
pub struct CommandQueue {
    items: Mutex<VecDeque<Bytes>>,
    capacity: usize,
    policy: DropPolicy,
}

impl CommandQueue {
    /// `capacity` must be at least 1; the config layer enforces it.
    pub fn new(capacity: usize, policy: DropPolicy) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            policy,
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<Bytes>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a payload, applying the drop policy when full.
    pub fn push(&self, payload: Bytes) -> Enqueued {
        let mut items = self.items();
        if items.len() < self.capacity {
            items.push_back(payload);
            return Enqueued::Accepted;
        }
        match self.policy {
            DropPolicy::DropNewest => Enqueued::Rejected(payload),
            DropPolicy::DropOldest => {
                let evicted = items.pop_front();
                items.push_back(payload);
                match evicted {
                    Some(old) => Enqueued::EvictedOldest(old),
                    None => Enqueued::Accepted,
                }
            }
        }
    }

    /// Put back a payload that failed to send, ahead of everything else.
    ///
    /// If other senders filled the queue while the payload was out, the
    /// newest queued entry is evicted and returned, whatever the drop policy.
    /// The failed payload keeps its place at the head.
    pub fn requeue_front(&self, payload: Bytes) -> Option<Bytes> {
        let mut items = self.items();
        items.push_front(payload);
        if items.len() > self.capacity {
            items.pop_back()
        } else {
            None
        }
    }

    pub fn pop(&self) -> Option<Bytes> {
        self.items().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Discard everything, returning how many payloads were dropped.
    pub fn clear(&self) -> usize {
        let mut items = self.items();
        let dropped = items.len();
        items.clear();
        dropped
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> DropPolicy {
        self.policy
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .finish()
    }
}
