use std::sync::Arc;

use bytes::Bytes;
use telelink_channel::{EventReceiver, Transport, TransportRegistry};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};

use crate::cmd::{decode_hex, RunArgs};
use crate::exit::{channel_error, io_error, CliResult, SUCCESS};
use crate::output::{print_event, OutputFormat};

type StdinLines = Lines<BufReader<Stdin>>;

pub async fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = args.transport.to_config()?;
    config.video_streams.extend(args.video.iter().cloned());
    config
        .validate()
        .map_err(|err| channel_error("invalid configuration", err))?;

    let (transport, events) =
        Transport::websocket(config).map_err(|err| channel_error("transport setup failed", err))?;
    let transport = Arc::new(transport);
    let registry = TransportRegistry::new();
    registry.register(args.transport.domain.clone(), Arc::clone(&transport));

    let outcome = match transport.start() {
        Ok(()) => pump(&args, &transport, events, format).await,
        Err(err) => Err(channel_error("start failed", err)),
    };

    registry.close_all().await;
    outcome
}

async fn pump(
    args: &RunArgs,
    transport: &Transport,
    mut events: EventReceiver,
    format: OutputFormat,
) -> CliResult<i32> {
    let mut stdin = args
        .stdin
        .then(|| BufReader::new(tokio::io::stdin()).lines());
    let mut printed = 0usize;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupted, shutting down");
                return Ok(SUCCESS);
            }
            event = events.recv() => {
                let Some(event) = event else {
                    return Ok(SUCCESS);
                };
                print_event(&event, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    return Ok(SUCCESS);
                }
            }
            line = next_line(&mut stdin) => {
                match line.map_err(|err| io_error("failed reading stdin", err))? {
                    Some(line) => {
                        let payload = encode_line(&line, args.hex)?;
                        if !payload.is_empty() && !transport.send_command(payload) {
                            warn!("command dropped, queue full");
                        }
                    }
                    None => stdin = None,
                }
            }
        }
    }
}

async fn next_line(lines: &mut Option<StdinLines>) -> std::io::Result<Option<String>> {
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

fn encode_line(line: &str, hex: bool) -> CliResult<Bytes> {
    if hex {
        decode_hex(line).map(Bytes::from)
    } else {
        Ok(Bytes::from(line.trim_end_matches('\r').to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_lines_drop_carriage_return() {
        assert_eq!(encode_line("go\r", false).unwrap(), Bytes::from_static(b"go"));
    }

    #[test]
    fn hex_lines_are_decoded() {
        assert_eq!(
            encode_line("01 02", true).unwrap(),
            Bytes::from_static(&[1, 2])
        );
        assert!(encode_line("0", true).is_err());
    }
}
