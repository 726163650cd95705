//! WebSocket links over TCP, with TLS for `wss://` endpoints.
//!
//! Certificate verification is disabled for `wss://` (trust-all). The remote
//! platform is reached over an operator-controlled private network and
//! presents a self-signed certificate; only deploy this connector where the
//! network offers equivalent isolation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::traits::{CloseInfo, Connector, Link, LinkEvent, OpenLink, LINK_EVENT_CAPACITY};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bound on the close handshake. A peer that has not answered by then is
/// abandoned and its reader task aborted.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for [`WsConnector`].
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Upper bound on TCP connect + TLS + WebSocket handshake. Default: 10 s.
    pub connect_timeout: Duration,
    /// Disable Nagle's algorithm on the TCP socket. Default: `true`.
    pub disable_nagle: bool,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            disable_nagle: true,
        }
    }
}

/// Opens WebSocket links.
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    config: WsConfig,
}

impl WsConnector {
    /// Create a connector with explicit configuration.
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }

    /// Current configuration.
    pub fn config(&self) -> &WsConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<OpenLink> {
        let url = endpoint.url();
        let mut request =
            url.as_str()
                .into_client_request()
                .map_err(|err| TransportError::InvalidEndpoint {
                    endpoint: url.clone(),
                    reason: err.to_string(),
                })?;
        for (name, value) in endpoint.headers() {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                TransportError::InvalidEndpoint {
                    endpoint: url.clone(),
                    reason: format!("header name {name:?}: {err}"),
                }
            })?;
            let value =
                HeaderValue::from_str(value).map_err(|err| TransportError::InvalidEndpoint {
                    endpoint: url.clone(),
                    reason: format!("header value for {name}: {err}"),
                })?;
            request.headers_mut().insert(name, value);
        }

        let tls = if endpoint.is_secure() {
            Some(tokio_tungstenite::Connector::Rustls(trust_all_client_config()))
        } else {
            None
        };

        let handshake = tokio_tungstenite::connect_async_tls_with_config(
            request,
            None,
            self.config.disable_nagle,
            tls,
        );
        let (stream, response) =
            match tokio::time::timeout(self.config.connect_timeout, handshake).await {
                Ok(Ok(ok)) => ok,
                Ok(Err(err)) => return Err(TransportError::connect(url, err)),
                Err(_) => {
                    return Err(TransportError::ConnectTimeout {
                        endpoint: url,
                        timeout: self.config.connect_timeout,
                    })
                }
            };
        info!(endpoint = %url, status = %response.status(), "websocket connected");

        let (sink, source) = stream.split();
        let open = Arc::new(AtomicBool::new(true));
        let closing = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(LINK_EVENT_CAPACITY);

        let reader = tokio::spawn(read_loop(
            source,
            tx,
            Arc::clone(&open),
            Arc::clone(&closing),
            url.clone(),
        ));

        Ok(OpenLink {
            link: Box::new(WsLink {
                sink: Mutex::new(sink),
                reader: StdMutex::new(Some(reader)),
                open,
                closing,
                endpoint: url,
            }),
            events: rx,
        })
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

async fn read_loop(
    mut source: SplitStream<WsStream>,
    events: mpsc::Sender<LinkEvent>,
    open: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    endpoint: String,
) {
    let close = loop {
        let event = match source.next().await {
            Some(Ok(Message::Binary(data))) => LinkEvent::Fragment { data, last: true },
            Some(Ok(Message::Text(text))) => LinkEvent::Text(text.as_str().to_owned()),
            Some(Ok(Message::Close(frame))) => {
                let remote = !closing.load(Ordering::SeqCst);
                break match frame {
                    Some(frame) => CloseInfo {
                        code: Some(u16::from(frame.code)),
                        reason: frame.reason.as_str().to_owned(),
                        remote,
                    },
                    None => CloseInfo {
                        code: None,
                        reason: "closed without close frame".to_string(),
                        remote,
                    },
                };
            }
            // Ping/pong are answered by tungstenite itself.
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                warn!(endpoint = %endpoint, error = %err, "websocket read failed");
                let _ = events.send(LinkEvent::Error(err.to_string())).await;
                break CloseInfo {
                    code: None,
                    reason: err.to_string(),
                    remote: !closing.load(Ordering::SeqCst),
                };
            }
            None => {
                break CloseInfo {
                    code: None,
                    reason: "stream ended".to_string(),
                    remote: !closing.load(Ordering::SeqCst),
                }
            }
        };

        if events.send(event).await.is_err() {
            debug!(endpoint = %endpoint, "link event receiver dropped; stopping reader");
            break CloseInfo::local("event receiver dropped");
        }
    };

    open.store(false, Ordering::SeqCst);
    debug!(endpoint = %endpoint, code = ?close.code, remote = close.remote, "websocket closed");
    let _ = events.send(LinkEvent::Closed(close)).await;
}

struct WsLink {
    sink: Mutex<SplitSink<WsStream, Message>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
    open: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    endpoint: String,
}

impl WsLink {
    fn take_reader(&self) -> Option<JoinHandle<()>> {
        self.reader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    async fn transmit(&self, message: Message) -> Result<()> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let mut sink = self.sink.lock().await;
        sink.send(message).await.map_err(|err| {
            self.open.store(false, Ordering::SeqCst);
            TransportError::Send(err.to_string())
        })
    }
}

#[async_trait]
impl Link for WsLink {
    async fn send(&self, payload: Bytes) -> Result<()> {
        self.transmit(Message::Binary(payload)).await
    }

    async fn ping(&self) -> Result<()> {
        self.transmit(Message::Ping(Bytes::new())).await
    }

    async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client closing".into(),
        };
        let mut reader = self.take_reader();
        let result = tokio::time::timeout(CLOSE_TIMEOUT, async {
            {
                let mut sink = self.sink.lock().await;
                sink.send(Message::Close(Some(frame))).await?;
                sink.close().await?;
            }
            // The reader ends once the peer echoes the close frame.
            if let Some(handle) = reader.as_mut() {
                let _ = handle.await;
            }
            Ok::<(), tokio_tungstenite::tungstenite::Error>(())
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(endpoint = %self.endpoint, error = %err, "error during close"),
            Err(_) => debug!(endpoint = %self.endpoint, "close timed out"),
        }
        if let Some(handle) = reader {
            handle.abort();
        }
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.closing.load(Ordering::SeqCst)
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        if let Some(handle) = self.take_reader() {
            handle.abort();
        }
    }
}

// ── Trust-all certificate verifier ───────────────────────────────────────────

#[derive(Debug)]
struct TrustAllVerifier;

impl rustls::client::danger::ServerCertVerifier for TrustAllVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn trust_all_client_config() -> Arc<rustls::ClientConfig> {
    // Ignored if a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(TrustAllVerifier))
        .with_no_client_auth();
    Arc::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let connector = WsConnector::default();
        assert_eq!(connector.config().connect_timeout, Duration::from_secs(10));
        assert!(connector.config().disable_nagle);
        assert_eq!(connector.name(), "websocket");
    }

    #[test]
    fn trust_all_config_builds() {
        let config = trust_all_client_config();
        assert!(config.alpn_protocols.is_empty());
    }

    #[tokio::test]
    async fn refused_connection_reports_connect_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = WsConnector::new(WsConfig {
            connect_timeout: Duration::from_secs(2),
            ..WsConfig::default()
        });
        let endpoint = Endpoint::state(addr.to_string());
        let err = connector.open(&endpoint).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[tokio::test]
    async fn close_abandons_a_silent_peer() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            // Completes the handshake, then never reads again.
            let _ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let connector = WsConnector::default();
        let OpenLink { link, mut events } =
            connector.open(&Endpoint::state(addr.to_string())).await.unwrap();
        assert!(link.is_open());

        let started = tokio::time::Instant::now();
        link.close().await;
        assert!(started.elapsed() < CLOSE_TIMEOUT * 3);
        assert!(!link.is_open());

        // The aborted reader dropped its sender without reporting a close.
        let next = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap();
        assert!(next.is_none());
        server.abort();
    }

    #[tokio::test]
    async fn invalid_header_rejected_before_connecting() {
        let connector = WsConnector::default();
        let endpoint = Endpoint::state("127.0.0.1:1").with_header("bad header", "x");
        let err = connector.open(&endpoint).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidEndpoint { .. }));
    }
}
