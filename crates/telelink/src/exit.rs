use std::fmt;
use std::io;

use telelink_channel::ChannelError;
use telelink_transport::TransportError;

// sysexits-style exit codes.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: &TransportError) -> CliError {
    let code = match err {
        TransportError::InvalidEndpoint { .. } => USAGE,
        TransportError::ConnectTimeout { .. } => TIMEOUT,
        _ => TRANSPORT_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    match err {
        ChannelError::ConfigRead { source, path } => {
            io_error(&format!("{context}: {}", path.display()), source)
        }
        ChannelError::InvalidConfig(_) => CliError::new(USAGE, format!("{context}: {err}")),
        ChannelError::ConfigParse(_) | ChannelError::Pool(_) | ChannelError::Delivery(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        ChannelError::ConnectFailed(ref source)
        | ChannelError::SendFailed(ref source)
        | ChannelError::KeepaliveFailed(ref source) => transport_error(context, source),
        ChannelError::QueueOverflow { .. } | ChannelError::Link(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        ChannelError::NoRuntime => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn config_errors_map_to_usage_and_data_codes() {
        let err = channel_error("config", ChannelError::InvalidConfig("x".to_string()));
        assert_eq!(err.code, USAGE);

        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = channel_error("config", ChannelError::ConfigParse(parse));
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn connect_timeout_maps_to_timeout() {
        let err = channel_error(
            "connect",
            ChannelError::ConnectFailed(TransportError::ConnectTimeout {
                endpoint: "ws://127.0.0.1:1/ws/ws_cmd".to_string(),
                timeout: Duration::from_secs(1),
            }),
        );
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("connect: "));
    }

    #[test]
    fn refused_maps_to_transport_error() {
        let err = transport_error(
            "connect",
            &TransportError::Refused {
                endpoint: "ws://x".to_string(),
                reason: "no".to_string(),
            },
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
    }
}
