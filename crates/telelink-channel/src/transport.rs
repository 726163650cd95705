use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::join_all;
use serde::Serialize;
use telelink_frame::{FrameBufferPool, PoolStats};
use telelink_transport::{Connector, WsConfig, WsConnector};
use tracing::info;

use crate::command::CommandChannel;
use crate::config::TransportConfig;
use crate::error::Result;
use crate::event::{EventReceiver, EventSink};
use crate::state::ConnectionState;
use crate::state_channel::{InboundStats, StateChannel, StreamKind};

/// One command channel, one state channel, and any video channels, all
/// pointed at the same domain.
///
/// Every channel reconnects on its own. Events from all of them arrive on
/// the receiver returned by [`Transport::new`].
pub struct Transport {
    config: TransportConfig,
    pool: Arc<FrameBufferPool>,
    command: CommandChannel,
    state: StateChannel,
    video: Vec<StateChannel>,
}

/// Serializable snapshot of one channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub channel: String,
    pub endpoint: String,
    pub state: ConnectionState,
    pub attempts: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbound: Option<InboundStats>,
}

/// Serializable snapshot of a whole transport.
#[derive(Debug, Clone, Serialize)]
pub struct TransportStatus {
    pub domain: String,
    pub connected: bool,
    pub command_queue_len: usize,
    pub channels: Vec<ChannelStatus>,
    pub pool: PoolStats,
}

impl Transport {
    /// Build a transport over `connector`. Nothing connects until
    /// [`start`](Self::start).
    pub fn new(
        config: TransportConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<(Self, EventReceiver)> {
        config.validate()?;
        let pool = Arc::new(FrameBufferPool::new(config.pool)?);
        let (events, rx) = EventSink::channel(config.event_capacity);

        let command = CommandChannel::new(
            config.command_endpoint(),
            Arc::clone(&connector),
            events.clone(),
            &config,
        );
        let state = StateChannel::new(
            StreamKind::Telemetry,
            config.state_endpoint(),
            Arc::clone(&connector),
            events.clone(),
            Arc::clone(&pool),
            &config,
        );
        let video = config
            .video_streams
            .iter()
            .map(|stream| {
                StateChannel::new(
                    StreamKind::Video(stream.clone()),
                    config.video_endpoint(stream),
                    Arc::clone(&connector),
                    events.clone(),
                    Arc::clone(&pool),
                    &config,
                )
            })
            .collect();

        Ok((
            Self {
                config,
                pool,
                command,
                state,
                video,
            },
            rx,
        ))
    }

    /// Build a transport over WebSocket links.
    pub fn websocket(config: TransportConfig) -> Result<(Self, EventReceiver)> {
        let connector = WsConnector::new(WsConfig {
            connect_timeout: config.connect_timeout,
            ..WsConfig::default()
        });
        Self::new(config, Arc::new(connector))
    }

    /// Start every channel. Returns immediately; connections come up in the
    /// background.
    pub fn start(&self) -> Result<()> {
        self.command.start()?;
        self.state.start()?;
        for channel in &self.video {
            channel.start()?;
        }
        info!(
            domain = %self.config.domain,
            video_streams = self.video.len(),
            "transport started"
        );
        Ok(())
    }

    /// Stop every channel. Idempotent.
    pub async fn stop(&self) {
        let inbound = std::iter::once(&self.state).chain(&self.video);
        futures_util::join!(
            self.command.stop(),
            join_all(inbound.map(|channel| channel.stop()))
        );
        info!(domain = %self.config.domain, "transport stopped");
    }

    /// Queue a command. Returns `false` if it was dropped on overflow.
    pub fn send_command(&self, payload: impl Into<Bytes>) -> bool {
        self.command.send(payload)
    }

    /// `true` only while both the command and the state channel are connected.
    pub fn is_connected(&self) -> bool {
        self.command.is_connected() && self.state.is_connected()
    }

    pub fn command_queue_len(&self) -> usize {
        self.command.queue_len()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<FrameBufferPool> {
        &self.pool
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn command(&self) -> &CommandChannel {
        &self.command
    }

    pub fn state(&self) -> &StateChannel {
        &self.state
    }

    pub fn video_channels(&self) -> &[StateChannel] {
        &self.video
    }

    /// Whether any channel still has a timer armed.
    pub fn timers_active(&self) -> bool {
        self.command.timers_active()
            || self.state.timers_active()
            || self.video.iter().any(StateChannel::timers_active)
    }

    pub fn status(&self) -> TransportStatus {
        let mut channels = vec![ChannelStatus {
            channel: "command".to_string(),
            endpoint: self.command.endpoint().url(),
            state: self.command.state(),
            attempts: self.command.attempts(),
            inbound: None,
        }];
        channels.extend(std::iter::once(&self.state).chain(&self.video).map(|channel| {
            ChannelStatus {
                channel: channel.role().to_string(),
                endpoint: channel.endpoint().url(),
                state: channel.state(),
                attempts: channel.attempts(),
                inbound: Some(channel.stats()),
            }
        }));
        TransportStatus {
            domain: self.config.domain.clone(),
            connected: self.is_connected(),
            command_queue_len: self.command_queue_len(),
            channels,
            pool: self.pool_stats(),
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("domain", &self.config.domain)
            .field("command", &self.command)
            .field("state", &self.state)
            .field("video", &self.video)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use telelink_transport::{MemoryConnector, COMMAND_PATH, STATE_PATH};

    use super::*;
    use crate::error::ChannelError;

    fn transport(config: TransportConfig) -> (Transport, MemoryConnector, EventReceiver) {
        let memory = MemoryConnector::new();
        let (transport, rx) = Transport::new(config, Arc::new(memory.clone())).unwrap();
        (transport, memory, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn connected_only_when_both_channels_are() {
        let (transport, memory, _rx) = transport(TransportConfig::default());
        memory.set_refusing(STATE_PATH, true);
        transport.start().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(transport.command().is_connected());
        assert!(!transport.is_connected());

        memory.set_refusing(STATE_PATH, false);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(transport.is_connected());
        transport.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn video_channels_do_not_gate_connectivity() {
        let config = TransportConfig {
            video_streams: vec!["heat".to_string(), "day".to_string()],
            ..TransportConfig::default()
        };
        let (transport, memory, _rx) = transport(config);
        memory.set_refusing("/ws/ws_rec_video_day", true);
        transport.start().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(transport.is_connected());
        assert_eq!(transport.video_channels().len(), 2);
        assert!(transport.video_channels()[0].is_connected());
        assert!(!transport.video_channels()[1].is_connected());

        let status = transport.status();
        assert_eq!(status.channels.len(), 4);
        assert_eq!(status.channels[3].channel, "video:day");
        transport.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_from_any_state_leaves_nothing_running() {
        let (transport, memory, _rx) = transport(TransportConfig::default());
        memory.set_refusing(COMMAND_PATH, true);
        transport.start().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        transport.stop().await;
        assert!(!transport.is_connected());
        assert!(!transport.timers_active());
        transport.stop().await;
        assert!(!transport.timers_active());
    }

    #[tokio::test]
    async fn invalid_config_rejected() {
        let config = TransportConfig {
            queue_capacity: 0,
            ..TransportConfig::default()
        };
        let err = Transport::new(config, Arc::new(MemoryConnector::new())).unwrap_err();
        assert!(matches!(err, ChannelError::InvalidConfig(_)));
    }

    #[test]
    fn start_outside_runtime_fails() {
        let (transport, _rx) =
            Transport::new(TransportConfig::default(), Arc::new(MemoryConnector::new())).unwrap();
        assert!(matches!(transport.start(), Err(ChannelError::NoRuntime)));
    }

    #[test]
    fn status_serializes() {
        let (transport, _rx) =
            Transport::new(TransportConfig::default(), Arc::new(MemoryConnector::new())).unwrap();
        let json = serde_json::to_value(transport.status()).unwrap();
        assert_eq!(json["connected"], false);
        assert_eq!(json["channels"][0]["state"], "disconnected");
        assert!(json["channels"][0].get("inbound").is_none());
        assert_eq!(json["pool"]["capacity"], 20);
    }
}
