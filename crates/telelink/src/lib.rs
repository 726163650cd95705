//! Reconnecting command, telemetry and video transport for teleoperated
//! platforms.
//!
//! A [`Transport`] keeps an outbound command connection and an inbound
//! telemetry connection (plus optional video connections) alive against one
//! domain, queueing commands while offline and reconnecting on a fixed
//! interval.
//!
//! # Crate Structure
//!
//! - [`transport`]: endpoints, the `Connector`/`Link` seam, WebSocket and
//!   in-memory links
//! - [`frame`]: frame buffer pool, fragment reassembly, video frame headers
//! - [`channel`]: command/state channels, reconnect supervision, the
//!   transport facade and its events
//!
//! ```no_run
//! use telelink::{Transport, TransportConfig, TransportEvent};
//!
//! # async fn demo() -> telelink::channel::Result<()> {
//! let (transport, mut events) = Transport::websocket(TransportConfig::for_domain("robot.local"))?;
//! transport.start()?;
//! transport.send_command(&b"\x01\x02"[..]);
//! while let Some(event) = events.recv().await {
//!     if let TransportEvent::Telemetry(payload) = event {
//!         println!("{} bytes of telemetry", payload.len());
//!     }
//! }
//! transport.stop().await;
//! # Ok(())
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use telelink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use telelink_frame::*;
}

/// Re-export channel types.
pub mod channel {
    pub use telelink_channel::*;
}

pub use telelink_channel::{
    ChannelRole, ConnectionState, DropPolicy, Transport, TransportConfig, TransportEvent,
    TransportRegistry, TransportStatus,
};
