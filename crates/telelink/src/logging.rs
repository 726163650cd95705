//! Diagnostics on stderr, so stdout stays clean for events and reports.
//!
//! `--log-level` applies to the telelink crates. Dependencies (tungstenite,
//! rustls, ...) stay at `warn` unless `RUST_LOG` says otherwise. `RUST_LOG`
//! directives are appended last and win, e.g.
//! `RUST_LOG=telelink_channel=trace,tokio_tungstenite=debug`.

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Targets that `--log-level` controls.
const TELELINK_TARGETS: [&str; 4] = [
    "telelink",
    "telelink_transport",
    "telelink_frame",
    "telelink_channel",
];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line, for log shippers.
    Json,
}

/// Verbosity of the telelink crates. `debug` adds connect attempts and
/// inbound statistics; `trace` adds per-message detail.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Filter directives for `level`, before any `RUST_LOG` additions.
fn directives(level: LogLevel) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(
        TELELINK_TARGETS
            .iter()
            .map(|target| format!("{target}={}", level.as_str())),
    );
    directives.join(",")
}

fn filter(level: LogLevel, env: Option<&str>) -> EnvFilter {
    let mut spec = directives(level);
    if let Some(extra) = env.map(str::trim).filter(|extra| !extra.is_empty()) {
        spec.push(',');
        spec.push_str(extra);
    }
    EnvFilter::builder().parse_lossy(spec)
}

/// Install the stderr subscriber. Targets are printed from `debug` up so a
/// line can be traced back to the channel layer that wrote it.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter(level, env.as_deref()))
        .with_ansi(false)
        .with_target(matches!(level, LogLevel::Debug | LogLevel::Trace));

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_applies_to_telelink_crates_only() {
        let spec = directives(LogLevel::Debug);
        assert!(spec.starts_with("warn,"));
        for target in TELELINK_TARGETS {
            assert!(spec.contains(&format!("{target}=debug")), "{spec}");
        }
    }

    #[test]
    fn env_directives_come_last() {
        let rendered = filter(LogLevel::Info, Some("telelink_channel=trace")).to_string();
        assert!(rendered.contains("telelink_channel=trace"), "{rendered}");
        assert!(rendered.contains("telelink_frame=info"), "{rendered}");

        let blank = filter(LogLevel::Error, Some("  ")).to_string();
        assert!(blank.contains("telelink=error"), "{blank}");
    }
}
