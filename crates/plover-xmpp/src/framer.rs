//! Incremental framing of raw stream text into complete top-level elements.
//!
//! XMPP uses a single long-lived XML document per session, so chunks arriving
//! from the transport routinely cut elements, comments, and CDATA sections in
//! half. A conforming XML parser rejects such partial documents; this module
//! therefore works on raw text with a tag-name stack and only hands complete
//! units to the parser.
//!
//! The `<stream:stream>` root is special: its open tag never closes during
//! the session, so the header and the closing `</stream:stream>` are emitted
//! as standalone units instead of participating in the stack.

use tracing::{debug, error, warn};

use crate::error::XmppError;

/// Hard cap on the unterminated buffer (1 MiB). A peer that streams an
/// element forever must not grow memory without bound.
pub const DEFAULT_MAX_BUFFER: usize = 1024 * 1024;

/// Incremental framer for XMPP stream text.
///
/// Feed raw chunks with [`StreamFramer::push`]; complete top-level units come
/// back in arrival order. State carries across calls, so a tag split between
/// two chunks frames correctly.
pub struct StreamFramer {
    /// Accumulated unframed text
    buffer: String,
    /// Buffer size cap before a forced reset
    max_buffer: usize,
}

/// Result of scanning the buffer once.
enum ScanOutcome {
    /// A complete unit ending at the byte offset
    Emit(String, usize),
    /// More data needed
    Incomplete,
    /// Close tag did not match the open tag on the stack top
    Mismatch { expected: String, found: String },
}

impl StreamFramer {
    /// Create a framer with the default buffer cap.
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER)
    }

    /// Create a framer with a specific buffer cap.
    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            buffer: String::new(),
            max_buffer,
        }
    }

    /// Append a chunk and return every complete unit now available.
    ///
    /// Framing errors (tag mismatch, oversized buffer) discard the entire
    /// buffer: the stream position is unknown mid-buffer and cannot be
    /// recovered.
    pub fn push(&mut self, chunk: &str) -> Result<Vec<String>, XmppError> {
        self.buffer.push_str(chunk);

        if self.buffer.len() > self.max_buffer {
            error!(
                size = self.buffer.len(),
                cap = self.max_buffer,
                "Framing buffer exceeded cap, discarding"
            );
            self.reset();
            return Err(XmppError::framing("Unterminated element exceeded buffer cap"));
        }

        let mut units = Vec::new();
        loop {
            match self.scan() {
                ScanOutcome::Emit(unit, end) => {
                    self.buffer.drain(..end);
                    if !unit.trim().is_empty() {
                        units.push(unit);
                    }
                }
                ScanOutcome::Incomplete => break,
                ScanOutcome::Mismatch { expected, found } => {
                    error!(%expected, %found, "Close tag mismatch, discarding buffer");
                    self.reset();
                    return Err(XmppError::framing(format!(
                        "Close tag </{}> does not match open tag <{}>",
                        found, expected
                    )));
                }
            }
        }

        // Keepalive whitespace between stanzas should not pin the buffer.
        if !self.buffer.is_empty() && self.buffer.trim().is_empty() {
            self.buffer.clear();
        }

        Ok(units)
    }

    /// Discard all buffered text.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Number of buffered bytes not yet framed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Scan the buffer for the next complete unit.
    fn scan(&self) -> ScanOutcome {
        let buf = self.buffer.as_str();
        let mut stack: Vec<&str> = Vec::new();
        let mut pos = 0usize;
        let mut unit_start: Option<usize> = None;

        while let Some(rel) = buf[pos..].find('<') {
            let tag_start = pos + rel;
            let rest = &buf[tag_start..];

            // Comments, CDATA, and processing instructions are skipped whole;
            // a partial one means the unit cannot be complete yet.
            if rest.starts_with("<!--") {
                match rest.find("-->") {
                    Some(end) => {
                        pos = tag_start + end + 3;
                        continue;
                    }
                    None => return ScanOutcome::Incomplete,
                }
            }
            if rest.starts_with("<![CDATA[") {
                match rest.find("]]>") {
                    Some(end) => {
                        pos = tag_start + end + 3;
                        continue;
                    }
                    None => return ScanOutcome::Incomplete,
                }
            }
            if rest.starts_with("<?") {
                match rest.find("?>") {
                    Some(end) => {
                        pos = tag_start + end + 2;
                        continue;
                    }
                    None => return ScanOutcome::Incomplete,
                }
            }

            let Some(gt_rel) = rest.find('>') else {
                return ScanOutcome::Incomplete;
            };
            let tag_end = tag_start + gt_rel + 1;
            let tag = &buf[tag_start..tag_end];

            if let Some(close) = tag.strip_prefix("</") {
                let name = tag_name(close);
                if let Some(top) = stack.pop() {
                    if top != name {
                        return ScanOutcome::Mismatch {
                            expected: top.to_string(),
                            found: name.to_string(),
                        };
                    }
                    if stack.is_empty() {
                        let start = unit_start.unwrap_or(0);
                        return ScanOutcome::Emit(buf[start..tag_end].to_string(), tag_end);
                    }
                    pos = tag_end;
                    continue;
                }
                // Close tag with nothing open: the stream root closing is a
                // unit of its own, anything else is a framing error.
                if name == "stream:stream" {
                    return ScanOutcome::Emit(tag.to_string(), tag_end);
                }
                return ScanOutcome::Mismatch {
                    expected: String::new(),
                    found: name.to_string(),
                };
            }

            let self_closing = tag.ends_with("/>");
            let name = tag_name(&tag[1..]);

            if stack.is_empty() && name == "stream:stream" && !self_closing {
                // Stream header: unclosed by design, emitted on its own
                // (including any XML declaration scanned past above).
                debug!("Framed stream header");
                return ScanOutcome::Emit(buf[..tag_end].trim().to_string(), tag_end);
            }

            if self_closing {
                if stack.is_empty() {
                    return ScanOutcome::Emit(buf[tag_start..tag_end].to_string(), tag_end);
                }
                pos = tag_end;
                continue;
            }

            if stack.is_empty() {
                unit_start = Some(tag_start);
            }
            stack.push(name);
            pos = tag_end;
        }

        if !stack.is_empty() {
            warn!(depth = stack.len(), "Buffer holds a partial element");
        }
        ScanOutcome::Incomplete
    }
}

impl Default for StreamFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the tag name from the text following `<` or `</`.
fn tag_name(s: &str) -> &str {
    let end = s
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(s.len());
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_message_across_chunks() {
        let mut framer = StreamFramer::new();

        let first = framer.push("<message to='a@b'>").unwrap();
        assert!(first.is_empty());

        let second = framer.push("<body>hi</body></message>").unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0], "<message to='a@b'><body>hi</body></message>");
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_multiple_units_in_one_chunk() {
        let mut framer = StreamFramer::new();
        let units = framer
            .push("<presence from='a@b'/><message to='c@d'><body>x</body></message><r xmlns='urn:xmpp:sm:3'/>")
            .unwrap();
        assert_eq!(units.len(), 3);
        assert_eq!(units[0], "<presence from='a@b'/>");
        assert!(units[1].starts_with("<message"));
        assert_eq!(units[2], "<r xmlns='urn:xmpp:sm:3'/>");
    }

    #[test]
    fn test_nested_same_name_children() {
        let mut framer = StreamFramer::new();
        let units = framer
            .push("<message><body>a</body><forwarded><message><body>b</body></message></forwarded></message>")
            .unwrap();
        assert_eq!(units.len(), 1);
    }

    #[test]
    fn test_stream_header_emitted_alone() {
        let mut framer = StreamFramer::new();
        let units = framer
            .push("<?xml version='1.0'?><stream:stream from='example.com' id='s1' version='1.0' xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams'>")
            .unwrap();
        assert_eq!(units.len(), 1);
        assert!(units[0].contains("<stream:stream"));
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_stream_header_and_features_together() {
        let mut framer = StreamFramer::new();
        let units = framer
            .push("<stream:stream from='example.com' version='1.0' xmlns:stream='http://etherx.jabber.org/streams'><stream:features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></stream:features>")
            .unwrap();
        assert_eq!(units.len(), 2);
        assert!(units[0].starts_with("<stream:stream"));
        assert!(units[1].starts_with("<stream:features"));
    }

    #[test]
    fn test_stream_close_is_a_unit() {
        let mut framer = StreamFramer::new();
        let units = framer.push("</stream:stream>").unwrap();
        assert_eq!(units, vec!["</stream:stream>".to_string()]);
    }

    #[test]
    fn test_comment_split_across_chunks() {
        let mut framer = StreamFramer::new();
        assert!(framer.push("<message><!-- partial ").unwrap().is_empty());
        let units = framer.push("comment --><body>x</body></message>").unwrap();
        assert_eq!(units.len(), 1);
    }

    #[test]
    fn test_cdata_with_markup_inside() {
        let mut framer = StreamFramer::new();
        let units = framer
            .push("<message><body><![CDATA[<not>a</tag>]]></body></message>")
            .unwrap();
        assert_eq!(units.len(), 1);
    }

    #[test]
    fn test_mismatch_discards_buffer() {
        let mut framer = StreamFramer::new();
        let err = framer.push("<message><body>x</wrong></message>");
        assert!(matches!(err, Err(XmppError::Framing(_))));
        assert_eq!(framer.buffered(), 0);

        // The framer keeps working on fresh input after a reset.
        let units = framer.push("<presence/>").unwrap();
        assert_eq!(units.len(), 1);
    }

    #[test]
    fn test_orphan_close_tag_is_an_error() {
        let mut framer = StreamFramer::new();
        assert!(framer.push("</message>").is_err());
    }

    #[test]
    fn test_buffer_cap_forces_reset() {
        let mut framer = StreamFramer::with_max_buffer(64);
        let long = format!("<message>{}", "a".repeat(128));
        assert!(framer.push(&long).is_err());
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_whitespace_keepalive_is_dropped() {
        let mut framer = StreamFramer::new();
        assert!(framer.push(" \n ").unwrap().is_empty());
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_tag_split_mid_name() {
        let mut framer = StreamFramer::new();
        assert!(framer.push("<mess").unwrap().is_empty());
        let units = framer.push("age to='a@b'><body>x</body></message>").unwrap();
        assert_eq!(units.len(), 1);
        assert!(units[0].starts_with("<message to='a@b'>"));
    }
}
