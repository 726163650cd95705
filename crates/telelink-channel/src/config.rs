use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use telelink_frame::PoolConfig;
use telelink_transport::{Endpoint, Scheme};

use crate::error::{ChannelError, Result};
use crate::queue::DropPolicy;

/// Default interval between reconnect checks.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(300);

/// Default interval between liveness keepalives.
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_millis(300);

/// Default bound on one connection handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default command queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default number of inbound events queued for the receiver before the
/// links stop being read.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Default period of inbound statistics logging.
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Transport settings. Durations are written in milliseconds in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// `host` or `host:port` of the remote platform.
    pub domain: String,
    pub scheme: Scheme,
    #[serde(rename = "reconnect_interval_ms", with = "millis")]
    pub reconnect_interval: Duration,
    #[serde(rename = "liveness_interval_ms", with = "millis")]
    pub liveness_interval: Duration,
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,
    pub queue_capacity: usize,
    pub drop_policy: DropPolicy,
    /// Inbound events (telemetry, video, delivery errors) held for the
    /// receiver at once.
    pub event_capacity: usize,
    /// Keepalive payload sent on the command channel. `None` sends a
    /// protocol-level ping instead.
    pub keepalive_payload: Option<Vec<u8>>,
    pub pool: PoolConfig,
    /// Video stream ids (e.g. `heat`, `day`), one inbound channel each.
    pub video_streams: Vec<String>,
    #[serde(rename = "stats_interval_ms", with = "millis")]
    pub stats_interval: Duration,
    /// Extra handshake headers sent on every channel.
    pub extra_headers: BTreeMap<String, String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            domain: "localhost:8080".to_string(),
            scheme: Scheme::Auto,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            drop_policy: DropPolicy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            keepalive_payload: None,
            pool: PoolConfig::default(),
            video_streams: Vec::new(),
            stats_interval: DEFAULT_STATS_INTERVAL,
            extra_headers: BTreeMap::new(),
        }
    }
}

impl TransportConfig {
    /// Defaults pointed at `domain`.
    pub fn for_domain(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ChannelError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            return Err(invalid("domain must not be empty"));
        }
        for (name, value) in [
            ("reconnect_interval_ms", self.reconnect_interval),
            ("liveness_interval_ms", self.liveness_interval),
            ("connect_timeout_ms", self.connect_timeout),
            ("stats_interval_ms", self.stats_interval),
        ] {
            if value.is_zero() {
                return Err(invalid(format!("{name} must be greater than zero")));
            }
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be at least 1"));
        }
        if self.event_capacity == 0 || self.event_capacity > MAX_EVENT_CAPACITY {
            return Err(invalid(format!(
                "event_capacity must be between 1 and {MAX_EVENT_CAPACITY}"
            )));
        }
        for stream in &self.video_streams {
            if stream.is_empty()
                || !stream
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(invalid(format!("invalid video stream id {stream:?}")));
            }
        }
        Ok(())
    }

    pub fn command_endpoint(&self) -> Endpoint {
        self.finish(Endpoint::command(&self.domain))
    }

    pub fn state_endpoint(&self) -> Endpoint {
        self.finish(Endpoint::state(&self.domain))
    }

    pub fn video_endpoint(&self, stream: &str) -> Endpoint {
        self.finish(Endpoint::video(&self.domain, stream))
    }

    fn finish(&self, endpoint: Endpoint) -> Endpoint {
        self.extra_headers
            .iter()
            .fold(endpoint.with_scheme(self.scheme), |endpoint, (name, value)| {
                endpoint.with_header(name, value)
            })
    }
}

const MAX_EVENT_CAPACITY: usize = 1 << 20;

fn invalid(reason: impl Into<String>) -> ChannelError {
    ChannelError::InvalidConfig(reason.into())
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.domain, "localhost:8080");
        assert_eq!(config.reconnect_interval, Duration::from_millis(300));
        assert_eq!(config.liveness_interval, Duration::from_millis(300));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.event_capacity, 64);
        assert_eq!(config.drop_policy, DropPolicy::DropNewest);
        assert_eq!(config.pool.buffer_size, 2 * 1024 * 1024);
        assert_eq!(config.pool.capacity, 20);
        assert_eq!(config.stats_interval, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = TransportConfig::from_json(
            r#"{
                "domain": "sych.local",
                "reconnect_interval_ms": 1000,
                "drop_policy": "drop_oldest",
                "pool": { "capacity": 4 },
                "video_streams": ["heat", "day"]
            }"#,
        )
        .unwrap();
        assert_eq!(config.domain, "sych.local");
        assert_eq!(config.reconnect_interval, Duration::from_secs(1));
        assert_eq!(config.liveness_interval, DEFAULT_LIVENESS_INTERVAL);
        assert_eq!(config.drop_policy, DropPolicy::DropOldest);
        assert_eq!(config.pool.capacity, 4);
        assert_eq!(config.pool.buffer_size, 2 * 1024 * 1024);
        assert_eq!(config.video_streams, vec!["heat", "day"]);
    }

    #[test]
    fn round_trips_through_json() {
        let config = TransportConfig {
            keepalive_payload: Some(vec![0, 1]),
            ..TransportConfig::for_domain("10.0.0.2:443")
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"liveness_interval_ms\":300"));
        assert_eq!(TransportConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn unknown_fields_rejected() {
        let err = TransportConfig::from_json(r#"{"domian": "typo"}"#).unwrap_err();
        assert!(matches!(err, ChannelError::ConfigParse(_)));
    }

    #[test]
    fn zero_values_rejected() {
        let err = TransportConfig::from_json(r#"{"queue_capacity": 0}"#).unwrap_err();
        assert!(matches!(err, ChannelError::InvalidConfig(_)));

        let err = TransportConfig::from_json(r#"{"reconnect_interval_ms": 0}"#).unwrap_err();
        assert!(err.to_string().contains("reconnect_interval_ms"));

        let err = TransportConfig::from_json(r#"{"event_capacity": 0}"#).unwrap_err();
        assert!(err.to_string().contains("event_capacity"));
    }

    #[test]
    fn bad_stream_id_rejected() {
        let err = TransportConfig::from_json(r#"{"video_streams": ["../etc"]}"#).unwrap_err();
        assert!(matches!(err, ChannelError::InvalidConfig(_)));
    }

    #[test]
    fn endpoints_follow_scheme_and_headers() {
        let mut config = TransportConfig::for_domain("localhost:9000");
        config.scheme = Scheme::Secure;
        config
            .extra_headers
            .insert("Authorization".to_string(), "token".to_string());

        let command = config.command_endpoint();
        assert_eq!(command.url(), "wss://localhost:9000/ws/ws_cmd");
        assert!(command.headers().iter().any(|(k, _)| k == "Authorization"));
        assert_eq!(
            config.video_endpoint("day").url(),
            "wss://localhost:9000/ws/ws_rec_video_day"
        );
    }

    #[test]
    fn missing_file_reports_path() {
        let err = TransportConfig::from_file("/nonexistent/telelink.json").unwrap_err();
        assert!(matches!(err, ChannelError::ConfigRead { .. }));
    }
}
