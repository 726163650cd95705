use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// Connection state of one channel.
///
/// ```text
/// DISCONNECTED ──attempt──▶ CONNECTING ──ok──▶ CONNECTED
///       ▲                        │                 │
///       └────────failed──────────┘                 │
///       └──────────close / error / stop────────────┘
/// ```
///
/// There is no edge from `Connected` back to `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }

    fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Connected)
                | (Self::Connecting, Self::Disconnected)
                | (Self::Connected, Self::Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic holder for a [`ConnectionState`] that only permits legal edges.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(ConnectionState::Disconnected as u8))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Move from `from` to `to` if the cell currently holds `from`.
    ///
    /// Returns `false` if the cell held something else or the edge is not
    /// part of the state machine.
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        if !from.can_become(to) {
            return false;
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Force `Disconnected`, returning the previous state.
    pub fn reset(&self) -> ConnectionState {
        ConnectionState::from_u8(
            self.0
                .swap(ConnectionState::Disconnected as u8, Ordering::SeqCst),
        )
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;
    use super::*;

    #[test]
    fn starts_disconnected() {
        assert_eq!(StateCell::new().get(), Disconnected);
    }

    #[test]
    fn legal_cycle() {
        let cell = StateCell::new();
        assert!(cell.transition(Disconnected, Connecting));
        assert!(cell.transition(Connecting, Connected));
        assert!(cell.transition(Connected, Disconnected));
        assert!(cell.transition(Disconnected, Connecting));
        assert!(cell.transition(Connecting, Disconnected));
        assert_eq!(cell.get(), Disconnected);
    }

    #[test]
    fn connected_never_goes_straight_to_connecting() {
        let cell = StateCell::new();
        assert!(cell.transition(Disconnected, Connecting));
        assert!(cell.transition(Connecting, Connected));
        assert!(!cell.transition(Connected, Connecting));
        assert_eq!(cell.get(), Connected);
    }

    #[test]
    fn stale_expectation_fails() {
        let cell = StateCell::new();
        assert!(!cell.transition(Connecting, Connected));
        assert!(cell.transition(Disconnected, Connecting));
        assert!(!cell.transition(Disconnected, Connecting));
    }

    #[test]
    fn reset_reports_previous() {
        let cell = StateCell::new();
        cell.transition(Disconnected, Connecting);
        cell.transition(Connecting, Connected);
        assert_eq!(cell.reset(), Connected);
        assert_eq!(cell.reset(), Disconnected);
    }
}
