use std::time::{Duration, Instant};

use serde::Serialize;
use telelink_channel::{ChannelError, EventReceiver, Transport, TransportEvent, TransportStatus};

use crate::cmd::{parse_duration, ProbeArgs};
use crate::exit::{channel_error, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_json, print_status, OutputFormat};

#[derive(Serialize)]
struct ProbeOutput {
    connected: bool,
    elapsed_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    status: TransportStatus,
}

pub async fn run(args: ProbeArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let config = args.transport.to_config()?;
    let (transport, mut events) =
        Transport::websocket(config).map_err(|err| channel_error("transport setup failed", err))?;
    if let Err(err) = transport.start() {
        transport.stop().await;
        return Err(channel_error("start failed", err));
    }

    let started = Instant::now();
    let mut last_error = None;
    let connected = tokio::time::timeout(
        timeout,
        wait_connected(&transport, &mut events, &mut last_error),
    )
    .await
    .is_ok();
    let out = ProbeOutput {
        connected,
        elapsed_ms: started.elapsed().as_millis(),
        last_error: last_error.map(|err: ChannelError| err.to_string()),
        status: transport.status(),
    };
    transport.stop().await;

    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => {
            print_status(&out.status, format);
            if let Some(err) = &out.last_error {
                println!("last error: {err}");
            }
        }
    }
    Ok(if connected { SUCCESS } else { TIMEOUT })
}

async fn wait_connected(
    transport: &Transport,
    events: &mut EventReceiver,
    last_error: &mut Option<ChannelError>,
) {
    while !transport.is_connected() {
        match tokio::time::timeout(Duration::from_millis(50), events.recv()).await {
            Ok(Some(TransportEvent::Error { error, .. })) => *last_error = Some(error),
            Ok(Some(_)) | Err(_) => {}
            Ok(None) => std::future::pending::<()>().await,
        }
    }
}
