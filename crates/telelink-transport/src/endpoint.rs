use std::fmt;

use serde::{Deserialize, Serialize};

/// Path of the outbound command endpoint.
pub const COMMAND_PATH: &str = "/ws/ws_cmd";

/// Path of the inbound telemetry/state endpoint.
pub const STATE_PATH: &str = "/ws/ws_state";

/// Prefix of the inbound video endpoints; the stream id is appended.
pub const VIDEO_PATH_PREFIX: &str = "/ws/ws_rec_video_";

/// How the URL scheme is chosen for an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Plain `ws://` for loopback hosts, `wss://` for everything else.
    #[default]
    Auto,
    /// Always `wss://`.
    Secure,
    /// Always `ws://`.
    Plain,
}

/// A remote endpoint: a domain (`host` or `host:port`) plus a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    domain: String,
    path: String,
    scheme: Scheme,
    headers: Vec<(String, String)>,
}

impl Endpoint {
    /// Create an endpoint with automatic scheme selection.
    pub fn new(domain: impl Into<String>, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self {
            domain: domain.into(),
            path,
            scheme: Scheme::Auto,
            headers: Vec::new(),
        }
    }

    /// The command endpoint on `domain`.
    pub fn command(domain: impl Into<String>) -> Self {
        Self::new(domain, COMMAND_PATH).with_header("X-Jon-Client-Type", "local-network")
    }

    /// The telemetry/state endpoint on `domain`.
    pub fn state(domain: impl Into<String>) -> Self {
        Self::new(domain, STATE_PATH)
    }

    /// The video endpoint for `stream` (e.g. `heat`, `day`) on `domain`.
    pub fn video(domain: impl Into<String>, stream: &str) -> Self {
        let endpoint = Self::new(domain, format!("{VIDEO_PATH_PREFIX}{stream}"));
        let origin = format!("https://{}", endpoint.host());
        endpoint
            .with_header("Origin", origin)
            .with_header("User-Agent", concat!("telelink/", env!("CARGO_PKG_VERSION")))
            .with_header("Cache-Control", "no-cache")
            .with_header("Pragma", "no-cache")
    }

    /// Override scheme selection.
    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Add a request header sent with the connection handshake.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The configured domain, including any port.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Handshake headers.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// The host part of the domain, without a trailing numeric port.
    ///
    /// Bracketed IPv6 literals keep their brackets; an unbracketed domain with
    /// more than one `:` is taken to be a bare IPv6 literal with no port.
    pub fn host(&self) -> &str {
        let domain = self.domain.as_str();
        if domain.starts_with('[') {
            return match domain.find(']') {
                Some(end) => &domain[..=end],
                None => domain,
            };
        }
        if domain.matches(':').count() != 1 {
            return domain;
        }
        match domain.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => host,
            _ => domain,
        }
    }

    /// Whether this endpoint is reached over TLS.
    pub fn is_secure(&self) -> bool {
        match self.scheme {
            Scheme::Secure => true,
            Scheme::Plain => false,
            Scheme::Auto => !matches!(self.host(), "localhost" | "127.0.0.1"),
        }
    }

    /// Full connection URL.
    pub fn url(&self) -> String {
        let scheme = if self.is_secure() { "wss" } else { "ws" };
        format!("{scheme}://{}{}", self.domain, self.path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}
