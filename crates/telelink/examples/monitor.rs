//! Monitor example: connect to a platform and print what arrives.
//!
//! Run with:
//!   cargo run --example monitor --features cli -- robot.local:8443 heat

use telelink::{Transport, TransportConfig, TransportEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let mut args = std::env::args().skip(1);
    let domain = args.next().unwrap_or_else(|| "localhost:8080".to_string());
    let config = TransportConfig {
        video_streams: args.collect(),
        ..TransportConfig::for_domain(domain)
    };

    let (transport, mut events) = Transport::websocket(config)?;
    transport.start()?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(TransportEvent::Connected { channel, endpoint }) => {
                    eprintln!("[{channel}] connected to {endpoint}");
                }
                Some(TransportEvent::Disconnected { channel, reason, .. }) => {
                    eprintln!("[{channel}] disconnected: {reason}");
                }
                Some(TransportEvent::Error { channel, error }) => {
                    eprintln!("[{channel}] {error}");
                }
                Some(TransportEvent::Telemetry(payload)) => {
                    eprintln!("[state] {} bytes (pooled={})", payload.len(), payload.is_pooled());
                }
                Some(TransportEvent::VideoFrame { stream, frame }) => {
                    eprintln!(
                        "[video:{stream}] pts={} duration={} {} bytes",
                        frame.timestamp,
                        frame.duration,
                        frame.data().len()
                    );
                }
                None => break,
            },
        }
    }

    transport.stop().await;
    eprintln!("pool: {:?}", transport.pool_stats());
    Ok(())
}
