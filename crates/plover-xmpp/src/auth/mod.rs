//! SASL authentication mechanisms.
//!
//! Implements the client side of SASL authentication for XMPP streams:
//! - SASL PLAIN (RFC 4616)
//! - SASL SCRAM-SHA-1 (RFC 5802)
//!
//! Mechanism choice follows a fixed security ranking; mechanisms the engine
//! does not implement are ignored during negotiation rather than attempted.

pub mod scram;

use base64::prelude::*;

pub use scram::{generate_nonce, ScramClient};

/// SASL authentication mechanism, ordered by security ranking.
///
/// The derived ordering is the negotiation preference: SCRAM-SHA-1 ranks
/// above PLAIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SaslMechanism {
    /// PLAIN mechanism (RFC 4616)
    Plain,
    /// SCRAM-SHA-1 mechanism (RFC 5802)
    ScramSha1,
}

impl SaslMechanism {
    /// Parse a mechanism name string into a SaslMechanism.
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "PLAIN" => Some(SaslMechanism::Plain),
            "SCRAM-SHA-1" => Some(SaslMechanism::ScramSha1),
            _ => None,
        }
    }

    /// Choose the strongest supported mechanism from an offered list.
    ///
    /// Unknown mechanism names are ignored, not negotiated. Returns None when
    /// nothing offered is supported.
    pub fn select<'a, I>(offered: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        offered
            .into_iter()
            .filter_map(Self::from_name)
            .max()
    }
}

impl std::fmt::Display for SaslMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaslMechanism::Plain => write!(f, "PLAIN"),
            SaslMechanism::ScramSha1 => write!(f, "SCRAM-SHA-1"),
        }
    }
}

/// Build the SASL PLAIN initial response.
///
/// PLAIN format: `authzid \0 authcid \0 password`, with an empty authzid.
pub fn plain_initial_response(username: &str, password: &str) -> String {
    BASE64_STANDARD.encode(format!("\0{}\0{}", username, password))
}
