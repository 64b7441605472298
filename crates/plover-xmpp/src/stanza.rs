//! Typed view over an inbound stanza.

use std::collections::HashMap;

use minidom::Element;

use crate::error::XmppError;

/// Classification of a top-level element by tag name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StanzaClass {
    /// Message stanza
    Message,
    /// IQ (info/query) stanza
    Iq,
    /// Presence stanza
    Presence,
    /// Anything else (stream management, nonzas)
    Other,
}

impl StanzaClass {
    /// Classify a tag name.
    pub fn of(name: &str) -> Self {
        match name {
            "message" => StanzaClass::Message,
            "iq" => StanzaClass::Iq,
            "presence" => StanzaClass::Presence,
            _ => StanzaClass::Other,
        }
    }

    /// Whether this class is one of the three RFC 6120 stanza kinds.
    ///
    /// Stream Management counts exactly these.
    pub fn is_stanza(&self) -> bool {
        matches!(
            self,
            StanzaClass::Message | StanzaClass::Iq | StanzaClass::Presence
        )
    }
}

impl std::fmt::Display for StanzaClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StanzaClass::Message => write!(f, "message"),
            StanzaClass::Iq => write!(f, "iq"),
            StanzaClass::Presence => write!(f, "presence"),
            StanzaClass::Other => write!(f, "other"),
        }
    }
}

/// A child value inside a dispatched stanza: either the raw element, or the
/// structured output of a registered stanza-plugin.
#[derive(Debug, Clone)]
pub enum StanzaValue {
    /// Untransformed child element
    Element(Element),
    /// Plugin-transformed structured value
    Object(HashMap<String, StanzaValue>),
    /// Plain text
    Text(String),
}

impl StanzaValue {
    /// The raw element, if untransformed.
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            StanzaValue::Element(el) => Some(el),
            _ => None,
        }
    }

    /// The structured map, if transformed.
    pub fn as_object(&self) -> Option<&HashMap<String, StanzaValue>> {
        match self {
            StanzaValue::Object(map) => Some(map),
            _ => None,
        }
    }

    /// The text value, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            StanzaValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Typed view over one inbound top-level element.
///
/// Constructed by the dispatcher; immutable once dispatched apart from the
/// plugin-transformed children added during construction.
#[derive(Debug, Clone)]
pub struct Stanza {
    class: StanzaClass,
    xml: Element,
    children: HashMap<String, StanzaValue>,
}

impl Stanza {
    /// Build the typed view over an element.
    pub fn new(element: Element) -> Self {
        let class = StanzaClass::of(element.name());
        let children = element
            .children()
            .map(|child| (child.name().to_string(), StanzaValue::Element(child.clone())))
            .collect();
        Self {
            class,
            xml: element,
            children,
        }
    }

    /// Stanza classification.
    pub fn class(&self) -> StanzaClass {
        self.class
    }

    /// Tag name of the underlying element.
    pub fn name(&self) -> &str {
        self.xml.name()
    }

    /// The `id` attribute.
    pub fn id(&self) -> Option<&str> {
        self.xml.attr("id")
    }

    /// The `to` attribute.
    pub fn to(&self) -> Option<&str> {
        self.xml.attr("to")
    }

    /// The `from` attribute.
    pub fn from(&self) -> Option<&str> {
        self.xml.attr("from")
    }

    /// The `type` attribute. Messages without one are "normal" per RFC 6121.
    pub fn stanza_type(&self) -> Option<&str> {
        match self.xml.attr("type") {
            None if self.class == StanzaClass::Message => Some("normal"),
            other => other,
        }
    }

    /// Whether the peer flagged this stanza as an error.
    pub fn is_error(&self) -> bool {
        self.xml.attr("type") == Some("error")
    }

    /// Decode the stanza error condition, when this is an error stanza.
    pub fn error(&self) -> Option<Result<XmppError, XmppError>> {
        self.is_error().then(|| XmppError::from_stanza(&self.xml))
    }

    /// A child value by tag name.
    pub fn child(&self, name: &str) -> Option<&StanzaValue> {
        self.children.get(name)
    }

    /// All child values.
    pub fn children(&self) -> &HashMap<String, StanzaValue> {
        &self.children
    }

    /// The underlying element.
    pub fn xml(&self) -> &Element {
        &self.xml
    }

    pub(crate) fn children_mut(&mut self) -> &mut HashMap<String, StanzaValue> {
        &mut self.children
    }
}
