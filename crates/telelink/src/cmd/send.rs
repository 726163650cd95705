use std::fs;
use std::time::{Duration, Instant};

use serde::Serialize;
use telelink_channel::{CommandChannel, EventReceiver, Transport, TransportEvent};
use tracing::debug;

use crate::cmd::{decode_hex, parse_duration, SendArgs};
use crate::exit::{channel_error, CliError, CliResult, DATA_INVALID, SUCCESS, TIMEOUT};
use crate::output::{print_json, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Serialize)]
struct SendOutput {
    endpoint: String,
    bytes: usize,
    attempts: u64,
    elapsed_ms: u128,
}

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let payload = resolve_payload(&args)?;
    let bytes = payload.len();
    let config = args.transport.to_config()?;

    let (transport, mut events) =
        Transport::websocket(config).map_err(|err| channel_error("transport setup failed", err))?;
    if let Err(err) = transport.start() {
        transport.stop().await;
        return Err(channel_error("start failed", err));
    }
    if !transport.send_command(payload) {
        transport.stop().await;
        return Err(CliError::new(DATA_INVALID, "command rejected by the queue"));
    }

    let started = Instant::now();
    let delivered = tokio::time::timeout(
        timeout,
        wait_delivered(transport.command(), &mut events),
    )
    .await;
    let attempts = transport.command().attempts();
    let endpoint = transport.command().endpoint().url();
    transport.stop().await;

    match delivered {
        Ok(()) => {
            let out = SendOutput {
                endpoint,
                bytes,
                attempts,
                elapsed_ms: started.elapsed().as_millis(),
            };
            match format {
                OutputFormat::Json | OutputFormat::Raw => print_json(&out),
                OutputFormat::Table | OutputFormat::Pretty => {
                    println!("sent {} bytes to {} ({} ms)", out.bytes, out.endpoint, out.elapsed_ms);
                }
            }
            Ok(SUCCESS)
        }
        Err(_) => Err(CliError::new(
            TIMEOUT,
            format!(
                "command not delivered to {endpoint} within {timeout:?} ({attempts} connect attempts)"
            ),
        )),
    }
}

async fn wait_delivered(command: &CommandChannel, events: &mut EventReceiver) {
    while command.transmitted() == 0 {
        tokio::select! {
            event = events.recv() => match event {
                Some(TransportEvent::Error { channel, error }) => {
                    debug!(%channel, %error, "waiting for delivery");
                }
                Some(_) => {}
                None => std::future::pending::<()>().await,
            },
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(hex) = &args.hex {
        return decode_hex(hex);
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::TransportArgs;

    fn args() -> SendArgs {
        SendArgs {
            transport: TransportArgs {
                domain: "127.0.0.1:1".to_string(),
                config: None,
                scheme: None,
                reconnect_interval: None,
                connect_timeout: None,
                queue_capacity: None,
                drop_policy: None,
                headers: Vec::new(),
            },
            data: None,
            hex: None,
            file: None,
            timeout: "5s".to_string(),
        }
    }

    #[test]
    fn payload_from_data_or_hex() {
        let mut send = args();
        send.data = Some("go".to_string());
        assert_eq!(resolve_payload(&send).unwrap(), b"go");

        let mut send = args();
        send.hex = Some("ff00".to_string());
        assert_eq!(resolve_payload(&send).unwrap(), vec![0xff, 0x00]);
    }

    #[test]
    fn missing_file_is_reported() {
        let mut send = args();
        send.file = Some("/nonexistent/payload.bin".into());
        let err = resolve_payload(&send).unwrap_err();
        assert!(err.message.contains("/nonexistent/payload.bin"));
    }
}
