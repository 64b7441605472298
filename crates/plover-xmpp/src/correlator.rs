//! Request/response correlation.
//!
//! An outgoing stanza's id is matched to exactly one future inbound stanza
//! of the same class. Each pending request owns a one-shot channel; exactly
//! one of resolve-on-match or reject-on-timeout fires, and whichever fires
//! first removes the other path. Concurrent requests are independent: every
//! entry is keyed by its own id.

use dashmap::DashMap;
use minidom::Element;
use tokio::sync::oneshot;
use tracing::debug;

use crate::stanza::StanzaClass;

struct PendingRequest {
    class: StanzaClass,
    tx: oneshot::Sender<Element>,
}

/// Table of in-flight request/response exchanges.
#[derive(Default)]
pub struct RequestCorrelator {
    pending: DashMap<String, PendingRequest>,
}

impl RequestCorrelator {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request and get the response channel.
    pub fn register(&self, id: &str, class: StanzaClass) -> oneshot::Receiver<Element> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .insert(id.to_string(), PendingRequest { class, tx });
        debug!(id, %class, outstanding = self.pending.len(), "Registered pending request");
        rx
    }

    /// Resolve a pending request against an inbound element.
    ///
    /// Only an element carrying the pending id AND the same stanza class
    /// resolves; an id collision across classes leaves the request pending.
    pub fn try_resolve(&self, class: StanzaClass, element: &Element) -> bool {
        let Some(id) = element.attr("id") else {
            return false;
        };
        match self.pending.remove_if(id, |_, pending| pending.class == class) {
            Some((id, pending)) => {
                debug!(%id, "Resolved pending request");
                // The caller may have timed out concurrently; a dead
                // receiver is fine.
                let _ = pending.tx.send(element.clone());
                true
            }
            None => false,
        }
    }

    /// Remove a pending request (the timeout path).
    pub fn remove(&self, id: &str) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Drop every pending request, closing their channels.
    pub fn clear(&self) {
        self.pending.clear();
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no requests are outstanding.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
