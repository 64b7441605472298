//! Session lifecycle events.
//!
//! The event vocabulary is a closed union owned by the engine. Feature
//! collaborators extend it by registering event-plugins, whose matches fire
//! as [`SessionEvent::Custom`] with the registered name — there is no
//! ambient type augmentation.

use jid::FullJid;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::stanza::Stanza;

/// Events emitted over a [`crate::Connection`] subscription.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The transport connected
    Connected,
    /// SASL completed (stream not yet restarted)
    Authenticated,
    /// Post-authentication stream features arrived
    StreamNegotiated,
    /// Resource binding completed; the session is usable
    SessionStart(FullJid),
    /// A previous session was resumed via stream management
    Resumed,
    /// The session ended (expected or not)
    SessionEnd,
    /// The connection is gone and will not resume
    Disconnected,
    /// A stanza was dispatched
    Stanza(Stanza),
    /// A registered event-plugin matched
    Custom {
        /// Event name given at registration
        name: String,
        /// The stanza that matched
        stanza: Stanza,
    },
}

/// Fan-out of session events to subscribers.
#[derive(Default)]
pub(crate) struct EventBus {
    subscribers: Vec<UnboundedSender<SessionEvent>>,
}

impl EventBus {
    /// Add a subscriber.
    pub(crate) fn subscribe(&mut self) -> UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver an event to every live subscriber, dropping closed ones.
    pub(crate) fn emit(&mut self, event: &SessionEvent) {
        self.subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fanout_and_pruning() {
        let mut bus = EventBus::default();
        let mut a = bus.subscribe();
        let b = bus.subscribe();

        bus.emit(&SessionEvent::Connected);
        assert!(matches!(a.try_recv(), Ok(SessionEvent::Connected)));

        drop(b);
        bus.emit(&SessionEvent::SessionEnd);
        assert!(matches!(a.try_recv(), Ok(SessionEvent::SessionEnd)));
    }
}
