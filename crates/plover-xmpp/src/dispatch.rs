//! Inbound stanza dispatch and outbound validation.
//!
//! The dispatcher classifies parsed elements into typed stanzas, runs
//! namespace-registered stanza-plugins over their children, applies ordered
//! send/receive interceptors, and matches event-plugins whose predicate
//! decides which named events fire.

use std::collections::HashMap;

use minidom::Element;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::XmppError;
use crate::stanza::{Stanza, StanzaClass, StanzaValue};

/// Default `xml:lang` stamped onto outbound messages that carry none.
const DEFAULT_LANG: &str = "en";

/// An ordered element transform applied on send or receive.
///
/// Interceptors must not change the identity type of the element (a message
/// stays a message); that contract is on the implementer, not checked here.
pub type Interceptor = Box<dyn FnMut(Element) -> Element + Send>;

/// A stanza-plugin: transforms a namespaced child element into structured
/// data.
pub type StanzaTransform = Box<dyn Fn(&Element) -> HashMap<String, StanzaValue> + Send>;

/// An event-plugin predicate.
pub type EventMatcher = Box<dyn Fn(&Stanza) -> bool + Send>;

/// Which interceptor list to register into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Applied to outbound elements before the transport write
    Send,
    /// Applied to inbound elements before dispatch
    Receive,
}

struct EventPlugin {
    event: String,
    matcher: EventMatcher,
}

/// Registry of stanza-plugins, event-plugins, and interceptors, plus the
/// dispatch walk that applies them.
#[derive(Default)]
pub struct Dispatcher {
    /// Namespace → child transform
    stanza_plugins: HashMap<String, StanzaTransform>,
    /// Stanza class → event plugins in registration order
    event_plugins: HashMap<StanzaClass, Vec<EventPlugin>>,
    send_interceptors: Vec<Interceptor>,
    receive_interceptors: Vec<Interceptor>,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transform for a child-element namespace.
    pub fn register_stanza_plugin(&mut self, namespace: impl Into<String>, f: StanzaTransform) {
        self.stanza_plugins.insert(namespace.into(), f);
    }

    /// Register an event-plugin: `event` fires for stanzas of `class` whose
    /// matcher returns true.
    pub fn register_event_plugin(
        &mut self,
        event: impl Into<String>,
        class: StanzaClass,
        matcher: EventMatcher,
    ) {
        self.event_plugins
            .entry(class)
            .or_default()
            .push(EventPlugin {
                event: event.into(),
                matcher,
            });
    }

    /// Register an interceptor at the end of the list for its direction.
    pub fn register_interceptor(&mut self, direction: Direction, f: Interceptor) {
        info!(?direction, "Registered interceptor");
        match direction {
            Direction::Send => self.send_interceptors.push(f),
            Direction::Receive => self.receive_interceptors.push(f),
        }
    }

    /// Apply the interceptor chain for a direction, in registration order.
    pub fn apply_interceptors(&mut self, direction: Direction, element: Element) -> Element {
        let chain = match direction {
            Direction::Send => &mut self.send_interceptors,
            Direction::Receive => &mut self.receive_interceptors,
        };
        chain.iter_mut().fold(element, |el, f| f(el))
    }

    /// Build the typed stanza, run the recursive plugin transform, and
    /// collect the names of every event-plugin that matched.
    pub fn dispatch(&self, element: Element) -> (Stanza, Vec<String>) {
        let mut stanza = Stanza::new(element);

        let mut path = Vec::new();
        transform_map(stanza.children_mut(), &self.stanza_plugins, &mut path);

        let mut events = Vec::new();
        if let Some(plugins) = self.event_plugins.get(&stanza.class()) {
            for plugin in plugins {
                if (plugin.matcher)(&stanza) {
                    debug!(event = %plugin.event, "Event plugin matched");
                    events.push(plugin.event.clone());
                }
            }
        }

        (stanza, events)
    }

    /// Drop every registration.
    pub fn clear(&mut self) {
        self.stanza_plugins.clear();
        self.event_plugins.clear();
        self.send_interceptors.clear();
        self.receive_interceptors.clear();
    }
}

/// Recursively replace plugin-matched children with their transformed
/// output.
///
/// Plugin output may itself contain namespaced elements, so the walk
/// recurses into transformed maps. A namespace already on the expansion path
/// is not expanded again: a plugin whose output reproduces its own
/// namespace would otherwise loop forever.
fn transform_map(
    map: &mut HashMap<String, StanzaValue>,
    plugins: &HashMap<String, StanzaTransform>,
    path: &mut Vec<String>,
) {
    for value in map.values_mut() {
        match value {
            StanzaValue::Element(el) => {
                let namespace = el.ns();
                if plugins.contains_key(&namespace) && !path.iter().any(|p| p == &namespace) {
                    let transform = &plugins[&namespace];
                    let mut transformed = transform(el);
                    path.push(namespace);
                    transform_map(&mut transformed, plugins, path);
                    path.pop();
                    *value = StanzaValue::Object(transformed);
                }
            }
            StanzaValue::Object(inner) => transform_map(inner, plugins, path),
            StanzaValue::Text(_) => {}
        }
    }
}

/// Validate and normalize an outbound stanza.
///
/// Performed before any transport write:
/// - a message without a recipient is rejected (no implicit recipient for
///   client-originated messages)
/// - an iq without a type is rejected
/// - a missing id is generated (unique for the connection's lifetime)
/// - a message without `xml:lang` gets a default
pub fn validate_outbound(mut element: Element) -> Result<Element, XmppError> {
    let name = element.name().to_string();

    if name == "message" && element.attr("to").is_none() {
        return Err(XmppError::protocol(
            "message stanza without a 'to' attribute",
        ));
    }
    if name == "iq" && element.attr("type").is_none() {
        return Err(XmppError::protocol("iq stanza without a 'type' attribute"));
    }

    if element.attr("id").is_none() {
        element.set_attr("id", Uuid::new_v4().to_string());
    }
    if name == "message" && element.attr("xml:lang").is_none() {
        element.set_attr("xml:lang", DEFAULT_LANG);
    }

    Ok(element)
}
