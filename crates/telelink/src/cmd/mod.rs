use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use telelink_channel::{DropPolicy, TransportConfig};
use telelink_transport::Scheme;

use crate::exit::{channel_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod probe;
pub mod run;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect and print every event until interrupted.
    Run(RunArgs),
    /// Deliver one command and exit.
    Send(SendArgs),
    /// Wait for the command and state channels to connect and report status.
    Probe(ProbeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format).await,
        Command::Send(args) => send::run(args, format).await,
        Command::Probe(args) => probe::run(args, format).await,
        Command::Version(args) => version::run(args, format),
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum SchemeArg {
    Auto,
    Secure,
    Plain,
}

impl From<SchemeArg> for Scheme {
    fn from(arg: SchemeArg) -> Self {
        match arg {
            SchemeArg::Auto => Scheme::Auto,
            SchemeArg::Secure => Scheme::Secure,
            SchemeArg::Plain => Scheme::Plain,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum DropPolicyArg {
    DropNewest,
    DropOldest,
}

impl From<DropPolicyArg> for DropPolicy {
    fn from(arg: DropPolicyArg) -> Self {
        match arg {
            DropPolicyArg::DropNewest => DropPolicy::DropNewest,
            DropPolicyArg::DropOldest => DropPolicy::DropOldest,
        }
    }
}

/// Connection settings shared by every subcommand that opens a transport.
/// Flags override values loaded from `--config`.
#[derive(Args, Debug)]
pub struct TransportArgs {
    /// Platform domain (`host` or `host:port`).
    pub domain: String,
    /// JSON config file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// URL scheme selection.
    #[arg(long)]
    pub scheme: Option<SchemeArg>,
    /// Interval between reconnect attempts (e.g. 300ms, 2s).
    #[arg(long, value_name = "DURATION")]
    pub reconnect_interval: Option<String>,
    /// Handshake timeout per attempt (e.g. 10s).
    #[arg(long, value_name = "DURATION")]
    pub connect_timeout: Option<String>,
    /// Command queue capacity.
    #[arg(long, value_name = "N")]
    pub queue_capacity: Option<usize>,
    /// What to drop when the command queue is full.
    #[arg(long)]
    pub drop_policy: Option<DropPolicyArg>,
    /// Extra handshake header, `Name: value`. Repeatable.
    #[arg(long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,
}

impl TransportArgs {
    pub fn to_config(&self) -> CliResult<TransportConfig> {
        let mut config = match &self.config {
            Some(path) => TransportConfig::from_file(path)
                .map_err(|err| channel_error("failed loading config", err))?,
            None => TransportConfig::default(),
        };
        config.domain = self.domain.clone();
        if let Some(scheme) = self.scheme {
            config.scheme = scheme.into();
        }
        if let Some(interval) = &self.reconnect_interval {
            config.reconnect_interval = parse_duration(interval)?;
        }
        if let Some(timeout) = &self.connect_timeout {
            config.connect_timeout = parse_duration(timeout)?;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(policy) = self.drop_policy {
            config.drop_policy = policy.into();
        }
        for header in &self.headers {
            let (name, value) = header
                .split_once(':')
                .ok_or_else(|| CliError::new(USAGE, format!("header must be `Name: value`: {header}")))?;
            config
                .extra_headers
                .insert(name.trim().to_string(), value.trim().to_string());
        }
        config
            .validate()
            .map_err(|err| channel_error("invalid configuration", err))?;
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub transport: TransportArgs,
    /// Also open the named video stream (e.g. heat, day). Repeatable.
    #[arg(long = "video", value_name = "STREAM")]
    pub video: Vec<String>,
    /// Send each stdin line as a command.
    #[arg(long)]
    pub stdin: bool,
    /// Decode stdin lines as hex before sending.
    #[arg(long, requires = "stdin")]
    pub hex: bool,
    /// Exit after printing N events.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub transport: TransportArgs,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["hex", "file"])]
    pub data: Option<String>,
    /// Hex-encoded payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub hex: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["data", "hex"])]
    pub file: Option<PathBuf>,
    /// How long to wait for delivery (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub transport: TransportArgs,
    /// How long to wait for both channels (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}

/// Decode a hex string, ignoring whitespace.
pub fn decode_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: Vec<u8> = input
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        return Err(CliError::new(USAGE, "hex payload has an odd number of digits"));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let text = std::str::from_utf8(pair).unwrap_or("??");
            u8::from_str_radix(text, 16)
                .map_err(|_| CliError::new(USAGE, format!("invalid hex digits: {text}")))
        })
        .collect()
}
