//! Connection capability for telelink.
//!
//! A [`Connector`] opens message-oriented [`Link`]s to [`Endpoint`]s. Two
//! implementations ship here:
//! - [`WsConnector`]: WebSocket over TCP, TLS for `wss://`
//! - [`MemoryConnector`]: in-process, scriptable, for tests and demos
//!
//! This is the lowest layer of telelink. The reconnecting channels in
//! `telelink-channel` only ever see the traits defined here.

pub mod endpoint;
pub mod error;
pub mod memory;
pub mod traits;
pub mod ws;

pub use endpoint::{Endpoint, Scheme, COMMAND_PATH, STATE_PATH, VIDEO_PATH_PREFIX};
pub use error::{Result, TransportError};
pub use memory::MemoryConnector;
pub use traits::{CloseInfo, Connector, Link, LinkEvent, LinkEvents, OpenLink};
pub use ws::{WsConfig, WsConnector};
