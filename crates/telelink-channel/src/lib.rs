//! Reconnecting channels for telelink.
//!
//! A [`Transport`] owns one outbound [`CommandChannel`], one inbound
//! [`StateChannel`] for telemetry, and an inbound channel per video stream.
//! Each channel reconnects on a fixed interval until stopped and reports
//! through a single [`EventReceiver`].

pub mod command;
pub mod config;
pub mod error;
pub mod event;
mod lifecycle;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod state_channel;
pub mod transport;

pub use command::CommandChannel;
pub use config::{
    TransportConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_EVENT_CAPACITY, DEFAULT_LIVENESS_INTERVAL,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_RECONNECT_INTERVAL, DEFAULT_STATS_INTERVAL,
};
pub use error::{ChannelError, Result};
pub use event::{ChannelRole, EventReceiver, TransportEvent};
pub use queue::{CommandQueue, DropPolicy, Enqueued};
pub use registry::TransportRegistry;
pub use scheduler::{LivenessTimer, ReconnectSupervisor, Schedule};
pub use state::ConnectionState;
pub use state_channel::{InboundStats, StateChannel, StreamKind};
pub use transport::{ChannelStatus, Transport, TransportStatus};
