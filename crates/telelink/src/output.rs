use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use telelink_channel::{TransportEvent, TransportStatus};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Debug, Serialize)]
struct EventOutput<'a> {
    event: &'static str,
    channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<usize>,
    detail: String,
    timestamp: String,
    #[serde(skip)]
    payload: Option<&'a [u8]>,
}

fn describe(event: &TransportEvent) -> EventOutput<'_> {
    let channel = event.channel().to_string();
    let (event_name, size, detail, payload) = match event {
        TransportEvent::Connected { endpoint, .. } => ("connected", None, endpoint.clone(), None),
        TransportEvent::Disconnected {
            code,
            reason,
            remote,
            ..
        } => {
            let side = if *remote { "remote" } else { "local" };
            let detail = match code {
                Some(code) => format!("{side} close {code}: {reason}"),
                None => format!("{side} close: {reason}"),
            };
            ("disconnected", None, detail, None)
        }
        TransportEvent::Error { error, .. } => ("error", None, error.to_string(), None),
        TransportEvent::Telemetry(payload) => {
            let data = payload.as_ref();
            ("telemetry", Some(data.len()), payload_preview(data), Some(data))
        }
        TransportEvent::VideoFrame { frame, .. } => {
            let data = frame.data();
            let detail = format!("pts={} duration={}", frame.timestamp, frame.duration);
            ("video_frame", Some(data.len()), detail, Some(data))
        }
    };
    EventOutput {
        event: event_name,
        channel,
        size,
        detail,
        timestamp: now_unix_millis(),
        payload,
    }
}

pub fn print_event(event: &TransportEvent, format: OutputFormat) {
    let out = describe(event);
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "CHANNEL", "SIZE", "DETAIL"])
                .add_row(vec![
                    out.event.to_string(),
                    out.channel.clone(),
                    out.size.map(|s| s.to_string()).unwrap_or_default(),
                    out.detail.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => match out.size {
            Some(size) => println!(
                "{} channel={} size={} {}",
                out.event, out.channel, size, out.detail
            ),
            None => println!("{} channel={} {}", out.event, out.channel, out.detail),
        },
        OutputFormat::Raw => {
            if let Some(data) = out.payload {
                print_raw(data);
            }
        }
    }
}

pub fn print_status(status: &TransportStatus, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(status),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "STATE", "ATTEMPTS", "MESSAGES", "ENDPOINT"]);
            for channel in &status.channels {
                table.add_row(vec![
                    channel.channel.clone(),
                    channel.state.to_string(),
                    channel.attempts.to_string(),
                    channel
                        .inbound
                        .map(|stats| stats.messages.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    channel.endpoint.clone(),
                ]);
            }
            println!("{table}");
            println!(
                "connected={} queued={} pool_free={}/{} hit_rate={:.2}",
                status.connected,
                status.command_queue_len,
                status.pool.free,
                status.pool.capacity,
                status.pool.hit_rate()
            );
        }
        OutputFormat::Pretty => {
            println!("domain={} connected={}", status.domain, status.connected);
            for channel in &status.channels {
                println!(
                    "  {} state={} attempts={} endpoint={}",
                    channel.channel, channel.state, channel.attempts, channel.endpoint
                );
            }
            println!(
                "  queued={} pool: {} acquisitions, {} hits, {} free",
                status.command_queue_len,
                status.pool.acquisitions,
                status.pool.hits,
                status.pool.free
            );
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_millis() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
