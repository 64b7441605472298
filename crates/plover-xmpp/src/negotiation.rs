//! Stream negotiation state machine.
//!
//! Drives stream opening, SASL mechanism selection and authentication,
//! the post-authentication stream restart, and resource binding. The machine
//! is synchronous: it consumes framed elements and returns the text to send
//! and the lifecycle transitions to surface, leaving all I/O to the caller.

use std::collections::HashSet;

use jid::{BareJid, FullJid};
use minidom::Element;
use tracing::{debug, info, warn};

use crate::auth::{plain_initial_response, SaslMechanism, ScramClient};
use crate::error::XmppError;
use crate::transport::FramingStyle;
use crate::xml::{extract_attribute, ns};

/// Stream lifecycle state.
///
/// Monotonically increasing during a session, except for re-entry when a
/// session is resumed after SessionEnd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StreamState {
    /// No transport
    Disconnected,
    /// Transport connect in progress
    Connecting,
    /// Transport up, stream not yet opened
    Connected,
    /// Stream open sent, waiting for the peer's header
    StreamStart,
    /// Peer acknowledged the stream
    StreamEstablished,
    /// SASL exchange in progress
    Authenticating,
    /// SASL completed
    Authenticated,
    /// Resource binding in progress
    Binding,
    /// Session usable
    Bound,
    /// SASL failed
    AuthFailed,
    /// The session ended
    SessionEnd,
}

/// Per-exchange SASL state, discarded after success or failure.
enum SaslContext {
    Plain,
    Scram(ScramClient),
}

/// What the caller must do in response to a consumed element.
#[derive(Debug)]
pub enum NegotiatorAction {
    /// Write this text to the transport
    Send(String),
    /// SASL completed (stream restart already queued)
    Authenticated,
    /// Post-authentication features arrived
    StreamNegotiated,
    /// Resource binding completed
    Bound(FullJid),
    /// Unrecoverable failure; tear the connection down
    Fatal(XmppError),
}

/// Parsed stream header information.
#[derive(Debug, Clone, Default)]
pub struct StreamHeader {
    /// The 'from' attribute (peer domain)
    pub from: Option<String>,
    /// The 'id' attribute (stream id, set by the peer)
    pub id: Option<String>,
    /// The 'version' attribute (should be "1.0")
    pub version: Option<String>,
}

impl StreamHeader {
    /// Parse a stream header from its raw tag text.
    ///
    /// Stream headers are intentionally unclosed XML, so attributes are
    /// extracted from the raw tag instead of a parsed element.
    pub fn parse(tag: &str) -> Self {
        Self {
            from: extract_attribute(tag, "from"),
            id: extract_attribute(tag, "id"),
            version: extract_attribute(tag, "version"),
        }
    }
}

/// The stream negotiation state machine.
pub struct Negotiator {
    state: StreamState,
    framing: FramingStyle,
    domain: String,
    local: String,
    bare: BareJid,
    resource: String,
    password: String,
    /// SASL has completed on this transport (survives the stream restart)
    authenticated: bool,
    /// Skip binding and let stream management resume instead
    resume_mode: bool,
    sasl: Option<SaslContext>,
    /// Namespaces announced in the latest stream features
    features: HashSet<String>,
    bind_id: Option<String>,
    #[cfg(test)]
    scram_nonce_override: Option<String>,
}

impl Negotiator {
    /// Create a machine for one connection.
    pub fn new(
        bare: BareJid,
        local: String,
        password: String,
        resource: String,
        framing: FramingStyle,
    ) -> Self {
        let domain = bare.domain().to_string();
        Self {
            state: StreamState::Disconnected,
            framing,
            domain,
            local,
            bare,
            resource,
            password,
            authenticated: false,
            resume_mode: false,
            sasl: None,
            features: HashSet::new(),
            bind_id: None,
            #[cfg(test)]
            scram_nonce_override: None,
        }
    }

    /// Current stream state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Whether resource binding (or resumption) has completed.
    pub fn is_bound(&self) -> bool {
        self.state == StreamState::Bound
    }

    /// Whether this negotiation resumes a previous session.
    pub fn is_resume_mode(&self) -> bool {
        self.resume_mode
    }

    /// Namespaces from the latest features announcement.
    pub fn features(&self) -> &HashSet<String> {
        &self.features
    }

    /// Rewind for a fresh connection attempt.
    pub fn reset(&mut self) {
        self.state = StreamState::Connecting;
        self.authenticated = false;
        self.resume_mode = false;
        self.sasl = None;
        self.features.clear();
        self.bind_id = None;
    }

    /// The session is over (transport gone or close requested).
    pub fn mark_session_end(&mut self) {
        self.state = StreamState::SessionEnd;
    }

    /// Stream management confirmed resumption; the stream is usable again.
    pub fn mark_resumed(&mut self) {
        self.resume_mode = false;
        self.state = StreamState::Bound;
    }

    /// Rewind for a reconnect that will resume via stream management:
    /// authentication is repeated, binding is not.
    pub fn reset_for_resume(&mut self) {
        self.state = StreamState::Connecting;
        self.authenticated = false;
        self.resume_mode = true;
        self.sasl = None;
        self.features.clear();
        self.bind_id = None;
    }

    #[cfg(test)]
    pub(crate) fn set_scram_nonce(&mut self, nonce: &str) {
        self.scram_nonce_override = Some(nonce.to_string());
    }

    /// The transport reported connected: open the stream.
    pub fn on_connected(&mut self) -> Vec<NegotiatorAction> {
        self.state = StreamState::StreamStart;
        debug!(domain = %self.domain, "Opening stream");
        vec![NegotiatorAction::Send(self.stream_open())]
    }

    /// The peer's stream header (or `<open/>` acknowledgement) arrived.
    pub fn handle_stream_header(&mut self, tag: &str) -> Vec<NegotiatorAction> {
        if self.state != StreamState::StreamStart {
            warn!(state = ?self.state, "Unexpected stream header");
            return Vec::new();
        }
        let header = StreamHeader::parse(tag);
        if let Some(ref version) = header.version {
            if version != "1.0" {
                warn!(%version, "Peer speaks an unexpected stream version");
            }
        }
        debug!(from = ?header.from, id = ?header.id, "Stream established");
        self.state = StreamState::StreamEstablished;
        Vec::new()
    }

    /// The peer closed the stream.
    pub fn handle_stream_end(&mut self) {
        info!("Peer closed the stream");
        self.state = StreamState::SessionEnd;
    }

    /// Consume one parsed pre-bind element.
    pub fn handle_element(&mut self, element: &Element) -> Vec<NegotiatorAction> {
        match (element.name(), element.ns().as_str()) {
            ("features", ns::STREAM) => self.handle_features(element),
            ("challenge", ns::SASL) => self.handle_challenge(element),
            ("success", ns::SASL) => self.handle_success(element),
            ("failure", ns::SASL) => self.handle_failure(element),
            ("iq", _) if self.state == StreamState::Binding => self.handle_bind_result(element),
            (name, ns) => {
                warn!(name, ns, state = ?self.state, "Unexpected element during negotiation");
                Vec::new()
            }
        }
    }

    /// Stream features: pre-auth they carry SASL mechanisms, post-auth they
    /// carry resource binding and the peer's extension support.
    fn handle_features(&mut self, element: &Element) -> Vec<NegotiatorAction> {
        self.features
            .extend(element.children().map(|child| child.ns().to_string()));

        if !self.authenticated {
            return self.start_authentication(element);
        }

        let mut actions = vec![NegotiatorAction::StreamNegotiated];
        if self.resume_mode {
            // Stream management takes over from here with <resume/>.
            return actions;
        }

        if element.get_child("bind", ns::BIND).is_some() {
            let id = uuid::Uuid::new_v4().to_string();
            debug!(bind_id = %id, resource = %self.resource, "Requesting resource binding");
            actions.push(NegotiatorAction::Send(format!(
                "<iq type='set' id='{}' to='{}'>\
                    <bind xmlns='{}'><resource>{}</resource></bind>\
                </iq>",
                id,
                self.domain,
                ns::BIND,
                self.resource
            )));
            self.bind_id = Some(id);
            self.state = StreamState::Binding;
        } else {
            warn!("Peer offered no resource binding feature");
        }
        actions
    }

    /// Pick the strongest mutually supported mechanism and start SASL.
    fn start_authentication(&mut self, features: &Element) -> Vec<NegotiatorAction> {
        let Some(mechanisms) = features.get_child("mechanisms", ns::SASL) else {
            warn!("Features without SASL mechanisms before authentication");
            return Vec::new();
        };

        let offered: Vec<String> = mechanisms
            .children()
            .filter(|child| child.name() == "mechanism")
            .map(|child| child.text())
            .collect();

        let Some(selected) = SaslMechanism::select(offered.iter().map(String::as_str)) else {
            return vec![NegotiatorAction::Fatal(XmppError::auth_failed(format!(
                "No supported SASL mechanism offered (peer offered: {})",
                offered.join(", ")
            )))];
        };

        info!(mechanism = %selected, "Starting SASL authentication");
        let payload = match selected {
            SaslMechanism::Plain => {
                self.sasl = Some(SaslContext::Plain);
                plain_initial_response(&self.local, &self.password)
            }
            SaslMechanism::ScramSha1 => {
                #[cfg(test)]
                let client = match self.scram_nonce_override.take() {
                    Some(nonce) => ScramClient::with_nonce(&self.local, &self.password, nonce),
                    None => ScramClient::new(&self.local, &self.password),
                };
                #[cfg(not(test))]
                let client = ScramClient::new(&self.local, &self.password);

                let payload = client.initial_response();
                self.sasl = Some(SaslContext::Scram(client));
                payload
            }
        };

        self.state = StreamState::Authenticating;
        vec![NegotiatorAction::Send(format!(
            "<auth xmlns='{}' mechanism='{}'>{}</auth>",
            ns::SASL,
            selected,
            payload
        ))]
    }

    fn handle_challenge(&mut self, element: &Element) -> Vec<NegotiatorAction> {
        match self.sasl {
            Some(SaslContext::Scram(ref mut client)) => {
                match client.handle_challenge_b64(&element.text()) {
                    Ok(response) => vec![NegotiatorAction::Send(format!(
                        "<response xmlns='{}'>{}</response>",
                        ns::SASL,
                        response
                    ))],
                    Err(e) => {
                        self.state = StreamState::AuthFailed;
                        vec![NegotiatorAction::Fatal(e)]
                    }
                }
            }
            _ => {
                warn!("Challenge outside a SCRAM exchange");
                Vec::new()
            }
        }
    }

    fn handle_success(&mut self, element: &Element) -> Vec<NegotiatorAction> {
        if let Some(SaslContext::Scram(ref client)) = self.sasl {
            // The server must prove knowledge of the password; a missing or
            // wrong signature is a trust violation, not a soft failure.
            if let Err(e) = client.verify_success_b64(&element.text()) {
                self.state = StreamState::AuthFailed;
                return vec![NegotiatorAction::Fatal(e)];
            }
        }

        info!("Authentication successful, restarting stream");
        self.sasl = None;
        self.authenticated = true;
        self.state = StreamState::StreamStart;
        vec![
            NegotiatorAction::Authenticated,
            NegotiatorAction::Send(self.stream_open()),
        ]
    }

    fn handle_failure(&mut self, element: &Element) -> Vec<NegotiatorAction> {
        let condition = element
            .children()
            .next()
            .map(|child| child.name().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        self.state = StreamState::AuthFailed;
        vec![NegotiatorAction::Fatal(XmppError::auth_failed(format!(
            "SASL failure: {}",
            condition
        )))]
    }

    /// The bind result must echo exactly the requested full JID; anything
    /// else means the session identity is not what was asked for.
    fn handle_bind_result(&mut self, element: &Element) -> Vec<NegotiatorAction> {
        if element.attr("id") != self.bind_id.as_deref() {
            warn!(id = ?element.attr("id"), "IQ with unknown id during binding");
            return Vec::new();
        }

        if element.attr("type") == Some("error") {
            let detail = XmppError::from_stanza(element)
                .map(|e| e.to_string())
                .unwrap_or_else(|e| e.to_string());
            return vec![NegotiatorAction::Fatal(XmppError::protocol(format!(
                "Resource binding refused: {}",
                detail
            )))];
        }

        let jid_text = element
            .get_child("bind", ns::BIND)
            .and_then(|bind| bind.get_child("jid", ns::BIND))
            .map(|jid| jid.text());
        let Some(jid_text) = jid_text else {
            return vec![NegotiatorAction::Fatal(XmppError::protocol(
                "Bind result without a <jid> element",
            ))];
        };

        let expected = format!("{}/{}", self.bare, self.resource);
        if jid_text != expected {
            return vec![NegotiatorAction::Fatal(XmppError::protocol(format!(
                "Bound JID {} does not match requested {}",
                jid_text, expected
            )))];
        }

        match jid_text.parse::<FullJid>() {
            Ok(full) => {
                info!(jid = %full, "Resource bound");
                self.state = StreamState::Bound;
                vec![NegotiatorAction::Bound(full)]
            }
            Err(e) => vec![NegotiatorAction::Fatal(XmppError::protocol(format!(
                "Bind result JID is malformed: {}",
                e
            )))],
        }
    }

    /// The stream-open text for this transport's framing style.
    fn stream_open(&self) -> String {
        match self.framing {
            FramingStyle::Stream => format!(
                "<?xml version=\"1.0\"?><stream:stream to=\"{}\" version=\"1.0\" \
                 xmlns=\"{}\" xmlns:stream=\"{}\">",
                self.domain,
                ns::JABBER_CLIENT,
                ns::STREAM
            ),
            FramingStyle::Framed => format!(
                "<open to=\"{}\" version=\"1.0\" xmlns=\"{}\"/>",
                self.domain,
                ns::FRAMING
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_unit;
    use base64::prelude::*;

    fn negotiator(framing: FramingStyle) -> Negotiator {
        Negotiator::new(
            "user@example.com".parse().unwrap(),
            "user".to_string(),
            "pencil".to_string(),
            "mobile".to_string(),
            framing,
        )
    }

    fn sent(actions: &[NegotiatorAction]) -> Vec<&String> {
        actions
            .iter()
            .filter_map(|a| match a {
                NegotiatorAction::Send(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_stream_open_per_framing_style() {
        let mut tcp = negotiator(FramingStyle::Stream);
        let actions = tcp.on_connected();
        let open = &sent(&actions)[0];
        assert!(open.contains("<stream:stream"));
        assert!(open.contains("to=\"example.com\""));
        assert!(open.contains("xmlns=\"jabber:client\""));
        assert_eq!(tcp.state(), StreamState::StreamStart);

        let mut ws = negotiator(FramingStyle::Framed);
        let actions = ws.on_connected();
        let open = &sent(&actions)[0];
        assert!(open.starts_with("<open "));
        assert!(open.contains("urn:ietf:params:xml:ns:xmpp-framing"));
    }

    #[test]
    fn test_header_establishes_stream() {
        let mut n = negotiator(FramingStyle::Stream);
        n.on_connected();
        n.handle_stream_header(
            "<stream:stream from='example.com' id='s1' version='1.0' \
             xmlns:stream='http://etherx.jabber.org/streams'>",
        );
        assert_eq!(n.state(), StreamState::StreamEstablished);
    }

    #[test]
    fn test_plain_authentication_flow() {
        let mut n = Negotiator::new(
            "alice@example.com".parse().unwrap(),
            "alice".to_string(),
            "secret".to_string(),
            "res".to_string(),
            FramingStyle::Stream,
        );
        n.on_connected();
        n.handle_stream_header("<stream:stream from='example.com' version='1.0'>");

        let features = parse_unit(
            "<stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
             <mechanism>PLAIN</mechanism></mechanisms></stream:features>",
        )
        .unwrap();
        let actions = n.handle_element(&features);
        let auth = &sent(&actions)[0];
        assert!(auth.contains("mechanism='PLAIN'"));
        assert!(auth.contains("AGFsaWNlAHNlY3JldA=="));
        assert_eq!(n.state(), StreamState::Authenticating);

        let success = parse_unit("<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>").unwrap();
        let actions = n.handle_element(&success);
        assert!(matches!(actions[0], NegotiatorAction::Authenticated));
        assert!(sent(&actions)[0].contains("<stream:stream"));
        assert_eq!(n.state(), StreamState::StreamStart);
    }

    #[test]
    fn test_scram_is_preferred_and_verified() {
        let mut n = negotiator(FramingStyle::Stream);
        n.set_scram_nonce("fyko+d2lbbFgONRv9qkxdawL");
        n.on_connected();
        n.handle_stream_header("<stream:stream from='example.com' version='1.0'>");

        let features = parse_unit(
            "<stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
             <mechanism>PLAIN</mechanism><mechanism>SCRAM-SHA-1</mechanism>\
             </mechanisms></stream:features>",
        )
        .unwrap();
        let actions = n.handle_element(&features);
        let auth = &sent(&actions)[0];
        assert!(auth.contains("mechanism='SCRAM-SHA-1'"));

        let challenge_payload = BASE64_STANDARD
            .encode("r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096");
        let challenge = parse_unit(&format!(
            "<challenge xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>{}</challenge>",
            challenge_payload
        ))
        .unwrap();
        let actions = n.handle_element(&challenge);
        let response = &sent(&actions)[0];
        let expected = BASE64_STANDARD.encode(
            "c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,p=v0X8v3Bz2T0CJGbJQyF0X+HI4Ts=",
        );
        assert!(response.contains(&expected));

        // A success whose v= does not match the derived signature is fatal.
        let forged = BASE64_STANDARD.encode("v=AAAAAAAAAAAAAAAAAAAAAAAAAAA=");
        let mut forked = {
            let success = parse_unit(&format!(
                "<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>{}</success>",
                forged
            ))
            .unwrap();
            let actions = n.handle_element(&success);
            actions
        };
        assert!(matches!(
            forked.pop(),
            Some(NegotiatorAction::Fatal(XmppError::Authentication(_)))
        ));
        assert_eq!(n.state(), StreamState::AuthFailed);
    }

    #[test]
    fn test_no_supported_mechanism_is_fatal() {
        let mut n = negotiator(FramingStyle::Stream);
        n.on_connected();
        n.handle_stream_header("<stream:stream from='example.com' version='1.0'>");

        let features = parse_unit(
            "<stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
             <mechanism>EXTERNAL</mechanism></mechanisms></stream:features>",
        )
        .unwrap();
        let actions = n.handle_element(&features);
        assert!(matches!(
            actions[0],
            NegotiatorAction::Fatal(XmppError::Authentication(_))
        ));
    }

    #[test]
    fn test_sasl_failure_is_fatal() {
        let mut n = negotiator(FramingStyle::Stream);
        n.on_connected();
        n.handle_stream_header("<stream:stream from='example.com' version='1.0'>");
        let features = parse_unit(
            "<stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
             <mechanism>PLAIN</mechanism></mechanisms></stream:features>",
        )
        .unwrap();
        n.handle_element(&features);

        let failure = parse_unit(
            "<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><not-authorized/></failure>",
        )
        .unwrap();
        let actions = n.handle_element(&failure);
        assert!(matches!(
            actions[0],
            NegotiatorAction::Fatal(XmppError::Authentication(_))
        ));
        assert_eq!(n.state(), StreamState::AuthFailed);
    }

    fn negotiate_to_binding(n: &mut Negotiator) -> String {
        n.on_connected();
        n.handle_stream_header("<stream:stream from='example.com' version='1.0'>");
        let features = parse_unit(
            "<stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
             <mechanism>PLAIN</mechanism></mechanisms></stream:features>",
        )
        .unwrap();
        n.handle_element(&features);
        let success = parse_unit("<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>").unwrap();
        n.handle_element(&success);
        n.handle_stream_header("<stream:stream from='example.com' version='1.0'>");

        let features = parse_unit(
            "<stream:features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>\
             <sm xmlns='urn:xmpp:sm:3'/></stream:features>",
        )
        .unwrap();
        let actions = n.handle_element(&features);
        assert!(matches!(actions[0], NegotiatorAction::StreamNegotiated));
        let bind_iq = sent(&actions)[0].clone();
        assert_eq!(n.state(), StreamState::Binding);
        bind_iq
    }

    #[test]
    fn test_binding_success() {
        let mut n = negotiator(FramingStyle::Stream);
        let bind_iq = negotiate_to_binding(&mut n);
        let bind_id = extract_attribute(&bind_iq, "id").unwrap();

        // Features collected across the negotiation are exposed.
        assert!(n.features().contains(ns::SM));

        let result = parse_unit(&format!(
            "<iq type='result' id='{}'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'>\
             <jid>user@example.com/mobile</jid></bind></iq>",
            bind_id
        ))
        .unwrap();
        let actions = n.handle_element(&result);
        match &actions[0] {
            NegotiatorAction::Bound(jid) => {
                assert_eq!(jid.to_string(), "user@example.com/mobile");
            }
            other => panic!("Expected Bound, got {:?}", other),
        }
        assert!(n.is_bound());
    }

    /// A bind result naming a different JID is a hard failure.
    #[test]
    fn test_binding_jid_mismatch_is_fatal() {
        let mut n = negotiator(FramingStyle::Stream);
        let bind_iq = negotiate_to_binding(&mut n);
        let bind_id = extract_attribute(&bind_iq, "id").unwrap();

        let result = parse_unit(&format!(
            "<iq type='result' id='{}'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'>\
             <jid>someone-else@example.com/other</jid></bind></iq>",
            bind_id
        ))
        .unwrap();
        let actions = n.handle_element(&result);
        assert!(matches!(
            actions[0],
            NegotiatorAction::Fatal(XmppError::Protocol(_))
        ));
    }

    #[test]
    fn test_binding_error_is_fatal() {
        let mut n = negotiator(FramingStyle::Stream);
        let bind_iq = negotiate_to_binding(&mut n);
        let bind_id = extract_attribute(&bind_iq, "id").unwrap();

        let result = parse_unit(&format!(
            "<iq type='error' id='{}'><error type='cancel'>\
             <conflict xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error></iq>",
            bind_id
        ))
        .unwrap();
        let actions = n.handle_element(&result);
        assert!(matches!(
            actions[0],
            NegotiatorAction::Fatal(XmppError::Protocol(_))
        ));
    }

    /// In resume mode the post-auth features do not trigger binding.
    #[test]
    fn test_resume_mode_skips_binding() {
        let mut n = negotiator(FramingStyle::Stream);
        n.reset_for_resume();
        n.on_connected();
        n.handle_stream_header("<stream:stream from='example.com' version='1.0'>");
        let features = parse_unit(
            "<stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
             <mechanism>PLAIN</mechanism></mechanisms></stream:features>",
        )
        .unwrap();
        n.handle_element(&features);
        let success = parse_unit("<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>").unwrap();
        n.handle_element(&success);
        n.handle_stream_header("<stream:stream from='example.com' version='1.0'>");

        let features = parse_unit(
            "<stream:features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>\
             <sm xmlns='urn:xmpp:sm:3'/></stream:features>",
        )
        .unwrap();
        let actions = n.handle_element(&features);
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], NegotiatorAction::StreamNegotiated));
        assert_ne!(n.state(), StreamState::Binding);

        n.mark_resumed();
        assert!(n.is_bound());
    }
}
