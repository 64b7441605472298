//! # plover-xmpp
//!
//! The connection engine of an XMPP client: turns a raw byte stream into an
//! authenticated, resumable, bidirectional stanza channel, and lets feature
//! modules (roster, MUC, pub-sub, …) attach behavior without knowing
//! transport or authentication details.
//!
//! ## Architecture
//!
//! - **Transport**: an external capability implementing [`Transport`];
//!   concrete TCP+TLS and WebSocket transports live outside this crate and
//!   are interchangeable
//! - **Stream Framer**: reconstructs complete top-level XML elements from
//!   raw chunks
//! - **Negotiator**: stream opening, SASL (PLAIN, SCRAM-SHA-1), stream
//!   restart, resource binding
//! - **Dispatcher**: typed stanza classification, stanza-plugins,
//!   event-plugins, send/receive interceptors
//! - **Correlator**: request/response matching with per-call timeouts
//! - **Stream Management**: XEP-0198 delivery counting and session
//!   resumption
//!
//! Inbound data flows Transport → Framer → Negotiator (pre-bind) or
//! Dispatcher (post-bind) → plugins, strictly in arrival order on a single
//! pump task per connection.

pub mod auth;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod dispatch;
pub mod events;
pub mod framer;
pub mod negotiation;
pub mod plugins;
pub mod stanza;
pub mod stream_management;
pub mod transport;
pub mod xml;

mod error;

pub use config::{ClientConfig, TransportProtocol};
pub use connection::{Connection, WeakConnection};
pub use dispatch::Direction;
pub use error::{StanzaErrorCondition, StanzaErrorType, XmppError};
pub use events::SessionEvent;
pub use framer::StreamFramer;
pub use negotiation::{StreamHeader, StreamState};
pub use plugins::{Plugin, PluginCtor};
pub use stanza::{Stanza, StanzaClass, StanzaValue};
pub use stream_management::SmStatus;
pub use transport::{Endpoint, FramingStyle, Transport, TransportEvent};
pub use xml::ns;
