//! Namespace constants and element helpers.
//!
//! The framer hands this module raw text units; stanzas inside a byte stream
//! inherit the default namespace from the enclosing `<stream:stream>` and
//! `stream:`-prefixed elements rely on a prefix declared on that same root,
//! so standalone units need their namespaces reconstructed before a
//! conforming parser will accept them.

use std::borrow::Cow;

use minidom::Element;

use crate::error::XmppError;

/// Namespace URIs used on the wire. These must match byte-for-byte.
pub mod ns {
    /// XMPP client namespace
    pub const JABBER_CLIENT: &str = "jabber:client";
    /// XMPP streams namespace
    pub const STREAM: &str = "http://etherx.jabber.org/streams";
    /// RFC 7395 WebSocket framing namespace
    pub const FRAMING: &str = "urn:ietf:params:xml:ns:xmpp-framing";
    /// SASL namespace
    pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
    /// Resource binding namespace
    pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
    /// Stanza error namespace
    pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
    /// XEP-0198 Stream Management namespace (version 3)
    pub const SM: &str = "urn:xmpp:sm:3";
}

/// Extract an attribute value from a raw XML tag string.
///
/// Used on stream headers, which are intentionally unclosed XML and cannot go
/// through the element parser.
pub fn extract_attribute(tag: &str, name: &str) -> Option<String> {
    // Try both single and double quotes
    for quote in ['"', '\''] {
        let pattern = format!("{}={}", name, quote);
        if let Some(start) = tag.find(&pattern) {
            let value_start = start + pattern.len();
            if let Some(value_end) = tag[value_start..].find(quote) {
                return Some(tag[value_start..value_start + value_end].to_string());
            }
        }
    }
    None
}

/// Convert a minidom Element to an XML string.
pub fn element_to_string(element: &Element) -> Result<String, XmppError> {
    let mut output = Vec::new();
    element
        .write_to(&mut output)
        .map_err(|e| XmppError::protocol(format!("Failed to serialize element: {}", e)))?;
    String::from_utf8(output).map_err(|e| XmppError::protocol(format!("Invalid UTF-8: {}", e)))
}

/// Rewrite `stream:`-prefixed elements into standalone form.
///
/// `<stream:features>` relies on `xmlns:stream` declared on the enclosing
/// `<stream:stream>`; as a standalone fragment the prefix is unresolvable.
/// Strip the prefix and declare the streams namespace explicitly.
fn rewrite_stream_prefix(trimmed: &str) -> String {
    let mut result = String::with_capacity(trimmed.len());
    let mut remaining = trimmed;
    // "</stream:" is checked first since "<stream:" is a prefix of it.
    while !remaining.is_empty() {
        if let Some(rest) = remaining.strip_prefix("</stream:") {
            result.push_str("</");
            remaining = rest;
        } else if let Some(rest) = remaining.strip_prefix("<stream:") {
            result.push('<');
            remaining = rest;
        } else {
            let mut chars = remaining.chars();
            result.push(chars.next().expect("non-empty remainder"));
            remaining = chars.as_str();
        }
    }

    // Declare the namespace on the root element if it is not already there.
    if let Some(pos) = result.find([' ', '>', '/']) {
        let root_tag_end = result.find('>').unwrap_or(result.len());
        if !result[..root_tag_end].contains("xmlns=") {
            let ch = result.as_bytes()[pos] as char;
            let xmlns_attr = format!(" xmlns='{}'", ns::STREAM);
            let mut rewritten = String::with_capacity(result.len() + xmlns_attr.len());
            rewritten.push_str(&result[..pos]);
            rewritten.push_str(&xmlns_attr);
            rewritten.push(ch);
            rewritten.push_str(&result[pos + 1..]);
            return rewritten;
        }
    }
    result
}

/// Inject the client namespace into a root tag that declares none.
///
/// Stanzas on a byte stream inherit `jabber:client` from the stream root, so
/// they usually arrive without an `xmlns` of their own.
fn inject_default_ns(trimmed: &str) -> Option<String> {
    let root_tag_end = trimmed.find('>')?;
    if trimmed[..root_tag_end].contains("xmlns") {
        return None;
    }
    let pos = trimmed.find([' ', '>', '/'])?;
    let ch = trimmed.as_bytes()[pos] as char;
    let xmlns_attr = format!(" xmlns='{}'", ns::JABBER_CLIENT);
    let mut rewritten = String::with_capacity(trimmed.len() + xmlns_attr.len());
    rewritten.push_str(&trimmed[..pos]);
    rewritten.push_str(&xmlns_attr);
    rewritten.push(ch);
    rewritten.push_str(&trimmed[pos + 1..]);
    Some(rewritten)
}

/// Normalize a framed unit so it parses as a standalone XML fragment.
pub fn normalize_unit(text: &str) -> Cow<'_, str> {
    let trimmed = text.trim();
    if trimmed.starts_with("<stream:") && !trimmed.starts_with("<stream:stream") {
        return Cow::Owned(rewrite_stream_prefix(trimmed));
    }
    match inject_default_ns(trimmed) {
        Some(rewritten) => Cow::Owned(rewritten),
        None if trimmed.len() == text.len() => Cow::Borrowed(text),
        None => Cow::Owned(trimmed.to_string()),
    }
}

/// Normalize and parse one framed unit into an element.
pub fn parse_unit(text: &str) -> Result<Element, XmppError> {
    let normalized = normalize_unit(text);
    normalized
        .parse::<Element>()
        .map_err(|e| XmppError::protocol(format!("Failed to parse element: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unit_injects_client_ns() {
        let element = parse_unit("<message to='bob@example.com'><body>hi</body></message>").unwrap();
        assert_eq!(element.name(), "message");
        assert_eq!(element.ns(), ns::JABBER_CLIENT);
    }

    #[test]
    fn test_parse_unit_keeps_declared_ns() {
        let element = parse_unit("<r xmlns='urn:xmpp:sm:3'/>").unwrap();
        assert_eq!(element.name(), "r");
        assert_eq!(element.ns(), ns::SM);
    }

    #[test]
    fn test_stream_features_prefix_rewrite() {
        let unit = "<stream:features>\
            <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
                <mechanism>PLAIN</mechanism>\
                <mechanism>SCRAM-SHA-1</mechanism>\
            </mechanisms></stream:features>";
        let element = parse_unit(unit).unwrap();
        assert_eq!(element.name(), "features");
        assert_eq!(element.ns(), ns::STREAM);
        let mechanisms = element.get_child("mechanisms", ns::SASL).unwrap();
        assert_eq!(mechanisms.children().count(), 2);
    }

    #[test]
    fn test_extract_attribute_both_quote_styles() {
        let tag = r#"<stream:stream to='example.com' version="1.0">"#;
        assert_eq!(
            extract_attribute(tag, "to"),
            Some("example.com".to_string())
        );
        assert_eq!(extract_attribute(tag, "version"), Some("1.0".to_string()));
        assert_eq!(extract_attribute(tag, "id"), None);
    }

    #[test]
    fn test_element_to_string_roundtrip() {
        let xml = "<message xmlns='jabber:client' to='bob@example.com'><body>Hello!</body></message>";
        let element: Element = xml.parse().unwrap();
        let output = element_to_string(&element).unwrap();

        let element2: Element = output.parse().unwrap();
        assert_eq!(element.name(), element2.name());
        assert_eq!(element.attr("to"), element2.attr("to"));
    }
}
