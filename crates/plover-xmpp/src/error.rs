//! Error types for the connection engine.

use minidom::Element;
use thiserror::Error;

use crate::xml::ns;

/// Errors produced by the connection engine.
///
/// The variants mirror the recovery policy applied to each class of failure:
/// framing and protocol errors are recovered locally (logged, buffer reset or
/// element dropped), authentication and resumption failures tear the session
/// down, timeouts and stanza errors reject only the request that caused them.
#[derive(Debug, Clone, Error)]
pub enum XmppError {
    /// Stream framing error (tag mismatch, oversized buffer)
    #[error("Framing error: {0}")]
    Framing(String),

    /// Unexpected element for the current stream state
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// SASL negotiation or verification failure
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A request or acknowledgement exceeded its deadline
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Transport-level failure (socket/WebSocket)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A plugin was looked up after deregistration (or was never registered)
    #[error("Plugin not registered: {0}")]
    PluginNotRegistered(String),

    /// The peer returned a stanza of type "error"
    #[error("Stanza error: {condition}")]
    Stanza {
        /// Error condition
        condition: StanzaErrorCondition,
        /// Error type
        error_type: StanzaErrorType,
        /// Optional text description
        text: Option<String>,
    },
}

impl XmppError {
    /// Create a new framing error.
    pub fn framing(msg: impl Into<String>) -> Self {
        Self::Framing(msg.into())
    }

    /// Create a new protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a new authentication error.
    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a new timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a new transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Decode a stanza of type "error" into a structured stanza error.
    ///
    /// Looks for the `<error>` child, its defined condition from the RFC 6120
    /// vocabulary, the error type attribute, and the optional `<text>`
    /// description. A missing or unknown condition is a decode failure, not a
    /// silently defaulted one.
    pub fn from_stanza(stanza: &Element) -> Result<Self, XmppError> {
        let error = stanza
            .children()
            .find(|c| c.name() == "error")
            .ok_or_else(|| XmppError::protocol("Stanza of type error has no <error> child"))?;

        let condition_el = error
            .children()
            .find(|c| c.ns() == ns::STANZAS && c.name() != "text")
            .ok_or_else(|| XmppError::protocol("Stanza error has no condition element"))?;

        let condition = StanzaErrorCondition::from_str(condition_el.name()).ok_or_else(|| {
            XmppError::protocol(format!(
                "Unknown stanza error condition: {}",
                condition_el.name()
            ))
        })?;

        let error_type = error
            .attr("type")
            .and_then(StanzaErrorType::from_str)
            .unwrap_or(StanzaErrorType::Cancel);

        let text = error
            .children()
            .find(|c| c.name() == "text" && c.ns() == ns::STANZAS)
            .map(|t| t.text());

        Ok(Self::Stanza {
            condition,
            error_type,
            text,
        })
    }
}

/// XMPP stanza error conditions (RFC 6120 Section 8.3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaErrorCondition {
    /// Bad request (malformed XML, etc.)
    BadRequest,
    /// Conflict (e.g., resource already bound)
    Conflict,
    /// Feature not implemented
    FeatureNotImplemented,
    /// Forbidden (permission denied)
    Forbidden,
    /// Gone (entity no longer available)
    Gone,
    /// Internal server error
    InternalServerError,
    /// Item not found
    ItemNotFound,
    /// JID malformed
    JidMalformed,
    /// Not acceptable
    NotAcceptable,
    /// Not allowed
    NotAllowed,
    /// Not authorized
    NotAuthorized,
    /// Policy violation
    PolicyViolation,
    /// Recipient unavailable
    RecipientUnavailable,
    /// Redirect
    Redirect,
    /// Registration required
    RegistrationRequired,
    /// Remote server not found
    RemoteServerNotFound,
    /// Remote server timeout
    RemoteServerTimeout,
    /// Resource constraint
    ResourceConstraint,
    /// Service unavailable
    ServiceUnavailable,
    /// Subscription required
    SubscriptionRequired,
    /// Undefined condition
    UndefinedCondition,
    /// Unexpected request
    UnexpectedRequest,
}

impl StanzaErrorCondition {
    /// Get the element name for this condition.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::Conflict => "conflict",
            Self::FeatureNotImplemented => "feature-not-implemented",
            Self::Forbidden => "forbidden",
            Self::Gone => "gone",
            Self::InternalServerError => "internal-server-error",
            Self::ItemNotFound => "item-not-found",
            Self::JidMalformed => "jid-malformed",
            Self::NotAcceptable => "not-acceptable",
            Self::NotAllowed => "not-allowed",
            Self::NotAuthorized => "not-authorized",
            Self::PolicyViolation => "policy-violation",
            Self::RecipientUnavailable => "recipient-unavailable",
            Self::Redirect => "redirect",
            Self::RegistrationRequired => "registration-required",
            Self::RemoteServerNotFound => "remote-server-not-found",
            Self::RemoteServerTimeout => "remote-server-timeout",
            Self::ResourceConstraint => "resource-constraint",
            Self::ServiceUnavailable => "service-unavailable",
            Self::SubscriptionRequired => "subscription-required",
            Self::UndefinedCondition => "undefined-condition",
            Self::UnexpectedRequest => "unexpected-request",
        }
    }

    /// Parse an element name into a condition.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "bad-request" => Some(Self::BadRequest),
            "conflict" => Some(Self::Conflict),
            "feature-not-implemented" => Some(Self::FeatureNotImplemented),
            "forbidden" => Some(Self::Forbidden),
            "gone" => Some(Self::Gone),
            "internal-server-error" => Some(Self::InternalServerError),
            "item-not-found" => Some(Self::ItemNotFound),
            "jid-malformed" => Some(Self::JidMalformed),
            "not-acceptable" => Some(Self::NotAcceptable),
            "not-allowed" => Some(Self::NotAllowed),
            "not-authorized" => Some(Self::NotAuthorized),
            "policy-violation" => Some(Self::PolicyViolation),
            "recipient-unavailable" => Some(Self::RecipientUnavailable),
            "redirect" => Some(Self::Redirect),
            "registration-required" => Some(Self::RegistrationRequired),
            "remote-server-not-found" => Some(Self::RemoteServerNotFound),
            "remote-server-timeout" => Some(Self::RemoteServerTimeout),
            "resource-constraint" => Some(Self::ResourceConstraint),
            "service-unavailable" => Some(Self::ServiceUnavailable),
            "subscription-required" => Some(Self::SubscriptionRequired),
            "undefined-condition" => Some(Self::UndefinedCondition),
            "unexpected-request" => Some(Self::UnexpectedRequest),
            _ => None,
        }
    }
}

impl std::fmt::Display for StanzaErrorCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// XMPP stanza error types (RFC 6120 Section 8.3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaErrorType {
    /// Retry after providing credentials
    Auth,
    /// Do not retry (unrecoverable error)
    Cancel,
    /// Retry after changing the data sent
    Modify,
    /// Retry after waiting (temporary error)
    Wait,
}

impl StanzaErrorType {
    /// Get the type attribute value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Cancel => "cancel",
            Self::Modify => "modify",
            Self::Wait => "wait",
        }
    }

    /// Parse a type attribute value.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "auth" => Some(Self::Auth),
            "cancel" => Some(Self::Cancel),
            "modify" => Some(Self::Modify),
            "wait" => Some(Self::Wait),
            _ => None,
        }
    }
}

impl std::fmt::Display for StanzaErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stanza_error_decode() {
        let xml = "<iq xmlns='jabber:client' type='error' id='x1'>\
            <error type='cancel'>\
                <item-not-found xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>\
                <text xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'>No such node</text>\
            </error></iq>";
        let element: Element = xml.parse().unwrap();

        let error = XmppError::from_stanza(&element).unwrap();
        match error {
            XmppError::Stanza {
                condition,
                error_type,
                text,
            } => {
                assert_eq!(condition, StanzaErrorCondition::ItemNotFound);
                assert_eq!(error_type, StanzaErrorType::Cancel);
                assert_eq!(text.as_deref(), Some("No such node"));
            }
            other => panic!("Expected stanza error, got {:?}", other),
        }
    }

    #[test]
    fn test_stanza_error_missing_condition() {
        let xml = "<iq xmlns='jabber:client' type='error' id='x2'>\
            <error type='cancel'/></iq>";
        let element: Element = xml.parse().unwrap();
        assert!(XmppError::from_stanza(&element).is_err());
    }

    #[test]
    fn test_stanza_error_unknown_condition() {
        let xml = "<iq xmlns='jabber:client' type='error' id='x3'>\
            <error type='cancel'>\
                <made-up-condition xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>\
            </error></iq>";
        let element: Element = xml.parse().unwrap();
        assert!(XmppError::from_stanza(&element).is_err());
    }

    #[test]
    fn test_stanza_error_conditions() {
        assert_eq!(StanzaErrorCondition::BadRequest.as_str(), "bad-request");
        assert_eq!(
            StanzaErrorCondition::from_str("not-authorized"),
            Some(StanzaErrorCondition::NotAuthorized)
        );
        assert_eq!(StanzaErrorCondition::from_str("nope"), None);
    }
}
