//! XEP-0198 Stream Management, client side.
//!
//! Adds reliability on top of the dispatcher in the `urn:xmpp:sm:3`
//! namespace:
//!
//! - `<enable/>` / `<enabled/>` - activate counting and resumption
//! - `<r/>` / `<a h='N'/>` - acknowledgement request and answer
//! - `<resume/>` / `<resumed/>` - restore a session after a dead transport
//! - `<failed/>` - the peer refused an operation
//!
//! Counters are modulo-2^32 per the extension's wire rule: all arithmetic
//! here wraps, and comparisons go through wrapping subtraction.

use minidom::Element;
use tracing::{debug, info, warn};

use crate::error::XmppError;
use crate::xml::ns;

/// Stream management activation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SmStatus {
    /// Not negotiated
    Disabled,
    /// `<enable/>` sent, waiting for the peer
    EnableSent,
    /// Peer confirmed with `<enabled/>`
    Enabled,
}

/// Peer confirmation that stream management is active.
#[derive(Debug, Clone)]
pub struct SmEnabled {
    /// Stream identifier used as `previd` on resumption
    pub id: String,
    /// Whether the peer acknowledged resumption support
    pub resume: bool,
    /// Maximum resumption window in seconds
    pub max: Option<u32>,
    /// Preferred reconnect location
    pub location: Option<String>,
}

impl SmEnabled {
    /// Parse an `<enabled/>` element.
    pub fn from_element(element: &Element) -> Result<Self, XmppError> {
        let id = element
            .attr("id")
            .ok_or_else(|| XmppError::protocol("<enabled/> without an id"))?
            .to_string();
        let resume = matches!(element.attr("resume"), Some("true") | Some("1"));
        let max = element.attr("max").and_then(|v| v.parse().ok());
        let location = element.attr("location").map(str::to_string);
        Ok(Self {
            id,
            resume,
            max,
            location,
        })
    }
}

/// Acknowledgement answer carrying the handled-stanza count.
#[derive(Debug, Clone, Copy)]
pub struct SmAck {
    /// Sequence number of the last handled stanza
    pub h: u32,
}

impl SmAck {
    /// Parse an `<a/>` or `<resumed/>` style `h` attribute.
    pub fn from_element(element: &Element) -> Result<Self, XmppError> {
        let h = element
            .attr("h")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| XmppError::protocol("Acknowledgement without a valid h attribute"))?;
        Ok(Self { h })
    }
}

/// Client-side stream management state.
///
/// Counter invariant: outbound only moves while status ≥ EnableSent, inbound
/// only while Enabled, and both are reconciled (never silently divergent)
/// whenever the peer reports a different count.
#[derive(Debug)]
pub struct StreamManagementState {
    status: SmStatus,
    /// Stanzas sent (peer's expected handled count)
    outbound: u32,
    /// Stanzas received and handled locally
    inbound: u32,
    /// Outbound stanzas between ack requests
    interval: u32,
    /// Outbound count at the last ack request, to fire once per boundary
    last_ack_request: u32,
    /// Resumption id from `<enabled/>`
    previd: Option<String>,
    /// Maximum resumption window in seconds
    max: Option<u32>,
    /// Preferred reconnect location
    location: Option<String>,
    /// A `<resume/>` is in flight
    resuming: bool,
}

impl StreamManagementState {
    /// Create a disabled state with the given ack-request interval.
    pub fn new(interval: u32) -> Self {
        Self {
            status: SmStatus::Disabled,
            outbound: 0,
            inbound: 0,
            interval: interval.max(1),
            last_ack_request: 0,
            previd: None,
            max: None,
            location: None,
            resuming: false,
        }
    }

    /// Current activation status.
    pub fn status(&self) -> SmStatus {
        self.status
    }

    /// Outbound counter.
    pub fn outbound(&self) -> u32 {
        self.outbound
    }

    /// Inbound counter.
    pub fn inbound(&self) -> u32 {
        self.inbound
    }

    /// Resumption id, once enabled with resume support.
    pub fn previd(&self) -> Option<&str> {
        self.previd.as_deref()
    }

    /// Whether an unexpected disconnect should attempt resumption.
    pub fn is_resumable(&self) -> bool {
        self.status == SmStatus::Enabled && self.previd.is_some()
    }

    /// Whether a `<resume/>` is currently in flight.
    pub fn is_resuming(&self) -> bool {
        self.resuming
    }

    /// The `<enable/>` request, marking the state EnableSent.
    pub fn enable_xml(&mut self) -> String {
        self.status = SmStatus::EnableSent;
        format!("<enable xmlns='{}' resume='true'/>", ns::SM)
    }

    /// Apply the peer's `<enabled/>` confirmation.
    pub fn handle_enabled(&mut self, enabled: SmEnabled) {
        if !enabled.resume {
            warn!("Peer enabled stream management without resumption support");
        }
        info!(id = %enabled.id, max = ?enabled.max, "Stream management enabled");
        self.previd = Some(enabled.id);
        self.max = enabled.max;
        self.location = enabled.location;
        self.status = SmStatus::Enabled;
    }

    /// Apply a `<failed/>`: returns true when it killed an in-flight
    /// resumption (a fatal condition for the session).
    pub fn handle_failed(&mut self) -> bool {
        let was_resuming = self.resuming;
        warn!(was_resuming, "Stream management operation failed");
        self.resuming = false;
        self.status = SmStatus::Disabled;
        self.previd = None;
        was_resuming
    }

    /// Count an outbound element. Only message/iq/presence count, and only
    /// once `<enable/>` has been sent.
    pub fn count_outbound(&mut self, name: &str) {
        if self.status >= SmStatus::EnableSent && is_counted(name) {
            self.outbound = self.outbound.wrapping_add(1);
            debug!(outbound = self.outbound, "Counted outbound stanza");
        }
    }

    /// Count an inbound element. Only message/iq/presence count, and only
    /// while enabled.
    pub fn count_inbound(&mut self, name: &str) {
        if self.status == SmStatus::Enabled && is_counted(name) {
            self.inbound = self.inbound.wrapping_add(1);
        }
    }

    /// An `<r/>` to send when the outbound counter crossed the interval
    /// boundary since the last request.
    pub fn take_ack_request(&mut self) -> Option<String> {
        if self.status != SmStatus::Enabled {
            return None;
        }
        if self.outbound != 0
            && self.outbound % self.interval == 0
            && self.last_ack_request != self.outbound
        {
            self.last_ack_request = self.outbound;
            debug!(outbound = self.outbound, "Requesting acknowledgement");
            return Some(format!("<r xmlns='{}'/>", ns::SM));
        }
        None
    }

    /// The `<a/>` answer for an incoming `<r/>`. Always answered, regardless
    /// of interval timing.
    pub fn answer_xml(&self) -> String {
        format!("<a xmlns='{}' h='{}'/>", ns::SM, self.inbound)
    }

    /// Apply the peer's `<a h='N'/>`: a divergent count is logged and the
    /// local counter corrected.
    pub fn handle_ack(&mut self, ack: SmAck) {
        if ack.h != self.outbound {
            warn!(
                local = self.outbound,
                peer = ack.h,
                "Peer handled count diverges from local outbound counter, reconciling"
            );
            self.outbound = ack.h;
        } else {
            debug!(h = ack.h, "Acknowledgement matches local counter");
        }
    }

    /// The `<resume/>` request for the stored session, marking a resumption
    /// in flight.
    pub fn resume_xml(&mut self) -> Option<String> {
        let previd = self.previd.as_deref()?;
        self.resuming = true;
        Some(format!(
            "<resume xmlns='{}' h='{}' previd='{}'/>",
            ns::SM,
            self.inbound,
            previd
        ))
    }

    /// Apply the peer's `<resumed h='N'/>`.
    pub fn handle_resumed(&mut self, ack: SmAck) {
        if ack.h != self.outbound {
            warn!(
                local = self.outbound,
                peer = ack.h,
                "Resumed with divergent handled count, reconciling"
            );
            self.outbound = ack.h;
        }
        self.resuming = false;
        self.status = SmStatus::Enabled;
        info!("Session resumed");
    }

    /// Outbound stanzas the peer has not acknowledged (wrapping-safe).
    pub fn unacked(&self, last_acked: u32) -> u32 {
        self.outbound.wrapping_sub(last_acked)
    }

    /// Drop all negotiated state.
    pub fn reset(&mut self) {
        self.status = SmStatus::Disabled;
        self.outbound = 0;
        self.inbound = 0;
        self.last_ack_request = 0;
        self.previd = None;
        self.max = None;
        self.location = None;
        self.resuming = false;
    }
}

/// Whether a tag name is one of the counted stanza kinds.
fn is_counted(name: &str) -> bool {
    matches!(name, "message" | "iq" | "presence")
}
