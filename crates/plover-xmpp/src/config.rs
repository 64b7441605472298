//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which transport to instantiate for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportProtocol {
    /// Direct TCP (optionally TLS), `<stream:stream>` framing
    Tcp,
    /// WebSocket (RFC 7395), `<open/>`/`<close/>` framing
    WebSocket,
}

impl std::fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportProtocol::Tcp => write!(f, "tcp"),
            TransportProtocol::WebSocket => write!(f, "ws"),
        }
    }
}

/// Connection configuration.
///
/// Everything has a sensible default; a bare `ClientConfig::default()`
/// connects over TLS to the JID domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Which transport to use
    pub protocol: TransportProtocol,
    /// Target host; falls back to the JID domain
    pub host: Option<String>,
    /// Target port; transports apply their own default when absent
    pub port: Option<u16>,
    /// URL path (WebSocket endpoints)
    pub path: Option<String>,
    /// Whether to use an encrypted transport
    pub tls: bool,
    /// Resource to bind; a random one is generated when absent and the JID
    /// carries none
    pub resource: Option<String>,
    /// Outbound stanzas between stream-management ack requests
    pub ack_interval: u32,
    /// Deadline for the whole connect/negotiate/bind sequence
    pub connect_timeout: Duration,
    /// Default deadline for request/response exchanges
    pub request_timeout: Duration,
    /// Framing buffer cap in bytes
    pub max_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocol: TransportProtocol::Tcp,
            host: None,
            port: None,
            path: None,
            tls: true,
            resource: None,
            ack_interval: 5,
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            max_buffer: crate::framer::DEFAULT_MAX_BUFFER,
        }
    }
}
