//! Transport seam consumed by the connection engine.
//!
//! The engine never opens sockets itself. Concrete transports (TCP+TLS,
//! WebSocket) live outside the core and implement [`Transport`]; the engine
//! drives them through this trait and consumes their notifications from the
//! channel returned by `connect`.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::{ClientConfig, TransportProtocol};
use crate::error::XmppError;

/// Notification from a transport to the engine.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The underlying connection is established
    Connected,
    /// Raw text received from the peer
    Data(String),
    /// The connection closed, with an optional reason
    Closed(Option<String>),
    /// A transport-level failure
    Error(String),
}

/// Which stream framing the transport expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingStyle {
    /// Byte stream: `<stream:stream …>` header, `</stream:stream>` trailer
    Stream,
    /// Framed (RFC 7395): `<open/>` and `<close/>` elements
    Framed,
}

/// A resolved endpoint handed to the transport.
///
/// DNS strategy is out of scope for the engine; the endpoint is composed
/// from configuration (or the JID domain) and passed through as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Target host
    pub host: String,
    /// Target port, if configured
    pub port: Option<u16>,
    /// URL path component (WebSocket endpoints)
    pub path: Option<String>,
    /// Whether the transport should use TLS
    pub tls: bool,
    /// Composed URL for URL-addressed transports
    pub url: String,
}

impl Endpoint {
    /// Compose an endpoint from configuration, falling back to the JID
    /// domain when no host is configured.
    pub fn from_config(config: &ClientConfig, domain: &str) -> Self {
        let host = config.host.clone().unwrap_or_else(|| domain.to_string());

        let scheme = match (config.protocol, config.tls) {
            (TransportProtocol::WebSocket, true) => "wss",
            (TransportProtocol::WebSocket, false) => "ws",
            (TransportProtocol::Tcp, true) => "xmpps",
            (TransportProtocol::Tcp, false) => "xmpp",
        };

        let mut url = format!("{}://{}", scheme, host);
        if let Some(port) = config.port {
            url.push_str(&format!(":{}", port));
        }
        if let Some(ref path) = config.path {
            url.push_str(&format!("/{}", path));
        }

        Self {
            host,
            port: config.port,
            path: config.path.clone(),
            tls: config.tls,
            url,
        }
    }
}

/// Contract between the engine and a concrete transport.
///
/// Failures are always possible; no operation is illegal to attempt after a
/// transport error — it is simply rejected with a `Transport` error.
#[async_trait]
pub trait Transport: Send {
    /// Which framing style the engine should speak over this transport.
    fn framing(&self) -> FramingStyle;

    /// Open the connection and return the notification channel.
    ///
    /// The transport emits [`TransportEvent::Connected`] once ready, then
    /// `Data` for every received chunk, and finally `Closed` or `Error`.
    async fn connect(
        &mut self,
        endpoint: &Endpoint,
    ) -> Result<mpsc::Receiver<TransportEvent>, XmppError>;

    /// Send raw text to the peer.
    async fn send(&mut self, data: &str) -> Result<(), XmppError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), XmppError>;
}
