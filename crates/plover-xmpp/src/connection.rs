//! The connection engine.
//!
//! A [`Connection`] owns one transport, one identity, the negotiation state
//! machine, the dispatcher registries, the request correlator, and the
//! stream management state. All inbound processing runs on a single pump
//! task in arrival order; the handle is cheaply cloneable and every public
//! mutation serializes on the engine state.
//!
//! Plugins receive the handle during `init` and must keep at most a
//! [`WeakConnection`]: the connection owns its plugins, so a strong
//! back-reference would form a cycle that never drops.

use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use jid::{BareJid, FullJid, Jid};
use minidom::Element;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::correlator::RequestCorrelator;
use crate::dispatch::{
    validate_outbound, Direction, Dispatcher, EventMatcher, Interceptor, StanzaTransform,
};
use crate::error::XmppError;
use crate::events::{EventBus, SessionEvent};
use crate::framer::StreamFramer;
use crate::negotiation::{Negotiator, NegotiatorAction, StreamState};
use crate::plugins::{Plugin, PluginCtor, PluginRegistry};
use crate::stanza::StanzaClass;
use crate::stream_management::{SmAck, SmEnabled, SmStatus, StreamManagementState};
use crate::transport::{Endpoint, FramingStyle, Transport, TransportEvent};
use crate::xml::{element_to_string, ns, parse_unit};

/// Engine state mutated only under one lock.
struct EngineState {
    negotiator: Negotiator,
    framer: StreamFramer,
    dispatcher: Dispatcher,
    plugins: PluginRegistry,
    /// Stream-management counting interceptors are installed once
    sm_hooked: bool,
    /// A user-requested disconnect is in progress
    closing: bool,
}

struct ConnectionInner {
    bare: BareJid,
    domain: String,
    config: ClientConfig,
    framing: FramingStyle,
    state: StdMutex<EngineState>,
    sm: Arc<StdMutex<StreamManagementState>>,
    correlator: RequestCorrelator,
    transport: AsyncMutex<Box<dyn Transport>>,
    events: StdMutex<EventBus>,
    bound: StdMutex<Option<FullJid>>,
    last_error: StdMutex<Option<XmppError>>,
    cancel: StdMutex<CancellationToken>,
}

/// Handle to one client connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

/// Non-owning handle for plugin back-references.
#[derive(Clone)]
pub struct WeakConnection {
    inner: Weak<ConnectionInner>,
}

impl WeakConnection {
    /// Upgrade to a live handle, if the connection still exists.
    pub fn upgrade(&self) -> Option<Connection> {
        self.inner.upgrade().map(|inner| Connection { inner })
    }
}

impl Connection {
    /// Create a connection for an identity and credential over the given
    /// transport.
    ///
    /// The JID may carry a resource; otherwise the configured one is used,
    /// or a random one is generated at binding time.
    pub fn new(
        jid: &str,
        password: &str,
        transport: Box<dyn Transport>,
        config: ClientConfig,
    ) -> Result<Self, XmppError> {
        let jid: Jid = jid
            .parse()
            .map_err(|e| XmppError::config(format!("Invalid JID: {}", e)))?;
        let bare = jid.to_bare();
        let local = bare
            .node()
            .map(|n| n.to_string())
            .ok_or_else(|| XmppError::config("JID must carry a local part"))?;
        let resource = jid
            .resource()
            .map(|r| r.to_string())
            .or_else(|| config.resource.clone())
            .unwrap_or_else(|| format!("plover-{}", &Uuid::new_v4().to_string()[..8]));
        let domain = bare.domain().to_string();
        let framing = transport.framing();

        let negotiator = Negotiator::new(
            bare.clone(),
            local,
            password.to_string(),
            resource,
            framing,
        );

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                bare,
                domain,
                framing,
                state: StdMutex::new(EngineState {
                    negotiator,
                    framer: StreamFramer::with_max_buffer(config.max_buffer),
                    dispatcher: Dispatcher::new(),
                    plugins: PluginRegistry::new(),
                    sm_hooked: false,
                    closing: false,
                }),
                sm: Arc::new(StdMutex::new(StreamManagementState::new(
                    config.ack_interval,
                ))),
                config,
                correlator: RequestCorrelator::new(),
                transport: AsyncMutex::new(transport),
                events: StdMutex::new(EventBus::default()),
                bound: StdMutex::new(None),
                last_error: StdMutex::new(None),
                cancel: StdMutex::new(CancellationToken::new()),
            }),
        })
    }

    /// The bare JID this connection authenticates as.
    pub fn jid(&self) -> &BareJid {
        &self.inner.bare
    }

    /// The full JID confirmed by resource binding, once bound.
    pub fn bound_jid(&self) -> Option<FullJid> {
        self.inner.bound.lock().unwrap().clone()
    }

    /// Current stream state.
    pub fn stream_state(&self) -> StreamState {
        self.inner.state.lock().unwrap().negotiator.state()
    }

    /// Current stream management status.
    pub fn sm_status(&self) -> SmStatus {
        self.inner.sm.lock().unwrap().status()
    }

    /// Stream management counters as (outbound, inbound).
    pub fn sm_counters(&self) -> (u32, u32) {
        let sm = self.inner.sm.lock().unwrap();
        (sm.outbound(), sm.inbound())
    }

    /// Namespaces the peer announced in the latest stream features.
    pub fn stream_features(&self) -> std::collections::HashSet<String> {
        self.inner
            .state
            .lock()
            .unwrap()
            .negotiator
            .features()
            .clone()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        self.inner.events.lock().unwrap().subscribe()
    }

    /// A non-owning handle for plugin back-references.
    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // =========================================================================
    // Registration surface
    // =========================================================================

    /// Declare a plugin constructor under a name with its dependencies.
    pub fn declare_plugin(
        &self,
        name: impl Into<String>,
        dependencies: Vec<String>,
        ctor: PluginCtor,
    ) {
        self.inner
            .state
            .lock()
            .unwrap()
            .plugins
            .declare(name, dependencies, ctor);
    }

    /// Register a declared plugin (and, transitively, its dependencies).
    pub fn register_plugin(&self, name: &str) -> Result<(), XmppError> {
        self.inner.state.lock().unwrap().plugins.register(name)
    }

    /// Deregister a plugin, cascading to its dependents. Later lookups fail
    /// with [`XmppError::PluginNotRegistered`].
    pub fn deregister_plugin(&self, name: &str) {
        self.inner.state.lock().unwrap().plugins.deregister(name);
    }

    /// Run a closure against a registered plugin instance.
    pub fn with_plugin<P: Plugin, R>(
        &self,
        name: &str,
        f: impl FnOnce(&P) -> R,
    ) -> Result<R, XmppError> {
        let state = self.inner.state.lock().unwrap();
        let plugin = state.plugins.get(name)?;
        let typed = plugin.as_any().downcast_ref::<P>().ok_or_else(|| {
            XmppError::PluginNotRegistered(format!("{} is not of the requested type", name))
        })?;
        Ok(f(typed))
    }

    /// Register a transform for a child-element namespace.
    pub fn register_stanza_plugin(&self, namespace: impl Into<String>, f: StanzaTransform) {
        self.inner
            .state
            .lock()
            .unwrap()
            .dispatcher
            .register_stanza_plugin(namespace, f);
    }

    /// Register an event-plugin firing `event` for matching stanzas.
    pub fn register_event_plugin(
        &self,
        event: impl Into<String>,
        class: StanzaClass,
        matcher: EventMatcher,
    ) {
        self.inner
            .state
            .lock()
            .unwrap()
            .dispatcher
            .register_event_plugin(event, class, matcher);
    }

    /// Register a send or receive interceptor.
    pub fn register_interceptor(&self, direction: Direction, f: Interceptor) {
        self.inner
            .state
            .lock()
            .unwrap()
            .dispatcher
            .register_interceptor(direction, f);
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Connect the transport and negotiate the stream through resource
    /// binding.
    ///
    /// Resolves once the session is usable (`session:start`); fails on
    /// authentication errors, transport failures, or the configured connect
    /// timeout.
    #[instrument(name = "xmpp.connection.connect", skip(self), fields(jid = %self.inner.bare))]
    pub async fn connect(&self) -> Result<(), XmppError> {
        {
            let state = self.inner.state.lock().unwrap();
            let stream_state = state.negotiator.state();
            if stream_state != StreamState::Disconnected && stream_state != StreamState::SessionEnd
            {
                return Err(XmppError::protocol("connect() on an active connection"));
            }
        }

        let cancel = CancellationToken::new();
        *self.inner.cancel.lock().unwrap() = cancel.clone();
        *self.inner.last_error.lock().unwrap() = None;

        self.init_plugins()?;

        let endpoint = Endpoint::from_config(&self.inner.config, &self.inner.domain);
        info!(url = %endpoint.url, "Connecting");

        {
            let mut state = self.inner.state.lock().unwrap();
            state.closing = false;
            state.framer = StreamFramer::with_max_buffer(self.inner.config.max_buffer);
            state.negotiator.reset();
        }

        let mut events = self.subscribe();
        let events_rx = {
            let mut transport = self.inner.transport.lock().await;
            match transport.connect(&endpoint).await {
                Ok(rx) => rx,
                Err(e) => {
                    self.inner.state.lock().unwrap().negotiator.mark_session_end();
                    return Err(e);
                }
            }
        };

        let pump_inner = self.inner.clone();
        tokio::spawn(async move {
            pump(pump_inner, events_rx, cancel).await;
        });

        let wait = async {
            while let Some(event) = events.recv().await {
                match event {
                    SessionEvent::SessionStart(_) => return Ok(()),
                    SessionEvent::Disconnected => {
                        let stored = self.inner.last_error.lock().unwrap().take();
                        return Err(stored.unwrap_or_else(|| {
                            XmppError::transport("Connection closed during negotiation")
                        }));
                    }
                    _ => {}
                }
            }
            Err(XmppError::transport("Event channel closed during negotiation"))
        };

        match tokio::time::timeout(self.inner.config.connect_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(XmppError::timeout("Stream negotiation did not complete")),
        }
    }

    /// Construct all registered plugins, then run every `init`.
    ///
    /// Instances exist before any `init` runs, so one plugin may look up
    /// another during its own initialization.
    fn init_plugins(&self) -> Result<(), XmppError> {
        let names = self.inner.state.lock().unwrap().plugins.instantiate_all();
        for name in names {
            let instance = self.inner.state.lock().unwrap().plugins.take(&name);
            if let Some(mut instance) = instance {
                debug!(plugin = %name, "Initializing plugin");
                let result = instance.init(self);
                self.inner
                    .state
                    .lock()
                    .unwrap()
                    .plugins
                    .put_back(&name, instance);
                result?;
            }
        }
        Ok(())
    }

    /// Close the stream and tear the connection down.
    ///
    /// Clears every plugin, interceptor, and pending request; subscribers
    /// see `session:end` followed by `disconnect`.
    #[instrument(name = "xmpp.connection.disconnect", skip(self))]
    pub async fn disconnect(&self) {
        info!("Disconnecting");
        {
            self.inner.state.lock().unwrap().closing = true;
        }
        self.inner.cancel.lock().unwrap().cancel();

        let close_frame = match self.inner.framing {
            FramingStyle::Stream => "</stream:stream>".to_string(),
            FramingStyle::Framed => format!("<close xmlns='{}'/>", ns::FRAMING),
        };
        if let Err(e) = self.write(&close_frame).await {
            debug!(error = %e, "Stream close write failed");
        }
        {
            let mut transport = self.inner.transport.lock().await;
            let _ = transport.close().await;
        }

        {
            let mut state = self.inner.state.lock().unwrap();
            state.negotiator.mark_session_end();
            state.dispatcher.clear();
            state.plugins.clear();
            state.sm_hooked = false;
        }
        self.inner.sm.lock().unwrap().reset();
        self.inner.correlator.clear();
        *self.inner.bound.lock().unwrap() = None;

        emit(&self.inner, SessionEvent::SessionEnd);
        emit(&self.inner, SessionEvent::Disconnected);
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Validate and send one stanza.
    ///
    /// Validation happens before any transport write; send interceptors run
    /// in registration order.
    #[instrument(name = "xmpp.stanza.send", skip(self, element), fields(kind = %element.name()))]
    pub async fn send(&self, element: Element) -> Result<(), XmppError> {
        let text = {
            let mut state = self.inner.state.lock().unwrap();
            let element = validate_outbound(element)?;
            let element = state.dispatcher.apply_interceptors(Direction::Send, element);
            element_to_string(&element)?
        };
        self.write(&text).await?;
        self.flush_ack_request().await;
        Ok(())
    }

    /// Parse and send raw XML. The caller is trusted to have built a
    /// well-formed stanza; only interceptors are applied.
    pub async fn send_xml(&self, xml: &str) -> Result<(), XmppError> {
        let text = {
            let mut state = self.inner.state.lock().unwrap();
            let element = parse_unit(xml)?;
            let element = state.dispatcher.apply_interceptors(Direction::Send, element);
            element_to_string(&element)?
        };
        self.write(&text).await?;
        self.flush_ack_request().await;
        Ok(())
    }

    /// Send a stanza and await the matching response.
    ///
    /// The stanza id (generated when absent) is matched against inbound
    /// stanzas of the same class. Exactly one of response or timeout wins;
    /// the loser is deregistered.
    pub async fn send_async(
        &self,
        mut element: Element,
        timeout: Duration,
    ) -> Result<Element, XmppError> {
        if element.attr("id").is_none() {
            element.set_attr("id", Uuid::new_v4().to_string());
        }
        let id = element
            .attr("id")
            .expect("id was just ensured")
            .to_string();
        let class = StanzaClass::of(element.name());

        let rx = self.inner.correlator.register(&id, class);
        if let Err(e) = self.send(element).await {
            self.inner.correlator.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(XmppError::transport(
                "Connection closed while awaiting a response",
            )),
            Err(_) => {
                self.inner.correlator.remove(&id);
                Err(XmppError::timeout(format!(
                    "No response to {} within {:?}",
                    id, timeout
                )))
            }
        }
    }

    /// Build a presence stanza.
    pub fn create_presence(&self, to: Option<&str>, presence_type: Option<&str>) -> Element {
        let mut builder = Element::builder("presence", ns::JABBER_CLIENT);
        if let Some(to) = to {
            builder = builder.attr("to", to);
        }
        if let Some(t) = presence_type {
            builder = builder.attr("type", t);
        }
        builder.build()
    }

    /// Build an iq stanza, optionally with an empty `<query>` child.
    pub fn create_iq(&self, iq_type: &str, to: Option<&str>, query_ns: Option<&str>) -> Element {
        let mut builder = Element::builder("iq", ns::JABBER_CLIENT).attr("type", iq_type);
        if let Some(to) = to {
            builder = builder.attr("to", to);
        }
        if let Some(q) = query_ns {
            builder = builder.append(Element::builder("query", q).build());
        }
        builder.build()
    }

    /// Send an iq and await its result with the configured request timeout.
    pub async fn send_iq(
        &self,
        iq_type: &str,
        to: &str,
        query_ns: Option<&str>,
    ) -> Result<Element, XmppError> {
        let iq = self.create_iq(iq_type, Some(to), query_ns);
        self.send_async(iq, self.inner.config.request_timeout).await
    }

    async fn write(&self, text: &str) -> Result<(), XmppError> {
        let mut transport = self.inner.transport.lock().await;
        transport.send(text).await
    }

    /// Send a stream-management ack request when the outbound counter
    /// crossed the interval boundary. Checked after the stanza write, never
    /// before.
    async fn flush_ack_request(&self) {
        let request = self.inner.sm.lock().unwrap().take_ack_request();
        if let Some(request) = request {
            if let Err(e) = self.write(&request).await {
                warn!(error = %e, "Failed to send ack request");
            }
        }
    }
}

/// Pending side effects of processing one transport event, executed after
/// every lock is released.
#[derive(Default)]
struct Effects {
    send: Vec<String>,
    events: Vec<SessionEvent>,
    fatal: Option<XmppError>,
}

fn emit(inner: &Arc<ConnectionInner>, event: SessionEvent) {
    inner.events.lock().unwrap().emit(&event);
}

/// The single pump task: processes transport events strictly in arrival
/// order.
async fn pump(
    inner: Arc<ConnectionInner>,
    mut rx: mpsc::Receiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => event,
        };

        let Some(event) = event else {
            // Channel gone without a Closed notification.
            if !handle_session_end(&inner, &mut rx).await {
                break;
            }
            continue;
        };

        match event {
            TransportEvent::Connected => {
                let effects = on_connected(&inner);
                if !run_effects(&inner, effects).await {
                    break;
                }
            }
            TransportEvent::Data(text) => {
                let effects = on_data(&inner, &text);
                if !run_effects(&inner, effects).await {
                    break;
                }
            }
            TransportEvent::Error(message) => {
                // The transport will follow up with Closed; remember the
                // cause for whoever observes the disconnect.
                error!(error = %message, "Transport error");
                *inner.last_error.lock().unwrap() = Some(XmppError::transport(message));
            }
            TransportEvent::Closed(reason) => {
                debug!(?reason, "Transport closed");
                if !handle_session_end(&inner, &mut rx).await {
                    break;
                }
            }
        }
    }
    debug!("Connection pump stopped");
}

/// Execute queued sends and events; returns false when the connection is
/// fatally gone.
async fn run_effects(inner: &Arc<ConnectionInner>, effects: Effects) -> bool {
    for text in effects.send {
        let mut transport = inner.transport.lock().await;
        if let Err(e) = transport.send(&text).await {
            warn!(error = %e, "Transport send failed");
        }
    }
    for event in effects.events {
        emit(inner, event);
    }
    if let Some(err) = effects.fatal {
        error!(error = %err, "Fatal connection error");
        *inner.last_error.lock().unwrap() = Some(err);
        {
            let mut transport = inner.transport.lock().await;
            let _ = transport.close().await;
        }
        inner.state.lock().unwrap().negotiator.mark_session_end();
        inner.correlator.clear();
        emit(inner, SessionEvent::SessionEnd);
        emit(inner, SessionEvent::Disconnected);
        return false;
    }
    true
}

fn on_connected(inner: &Arc<ConnectionInner>) -> Effects {
    let mut effects = Effects::default();
    effects.events.push(SessionEvent::Connected);
    let mut state = inner.state.lock().unwrap();
    let actions = state.negotiator.on_connected();
    apply_negotiator_actions(inner, &mut state, actions, &mut effects);
    effects
}

fn on_data(inner: &Arc<ConnectionInner>, text: &str) -> Effects {
    let mut effects = Effects::default();
    let units = {
        let mut state = inner.state.lock().unwrap();
        match state.framer.push(text) {
            Ok(units) => units,
            Err(e) => {
                // Recovered locally: the buffer was discarded, the
                // connection stays up for the next chunk.
                warn!(error = %e, "Framing error");
                return effects;
            }
        }
    };
    for unit in units {
        process_unit(inner, &unit, &mut effects);
        if effects.fatal.is_some() {
            break;
        }
    }
    effects
}

fn process_unit(inner: &Arc<ConnectionInner>, unit: &str, effects: &mut Effects) {
    let trimmed = unit.trim();

    if trimmed.starts_with("<?xml")
        || trimmed.starts_with("<stream:stream")
        || (trimmed.starts_with("<open") && trimmed.contains(ns::FRAMING))
    {
        let mut state = inner.state.lock().unwrap();
        let actions = state.negotiator.handle_stream_header(trimmed);
        apply_negotiator_actions(inner, &mut state, actions, effects);
        return;
    }
    if trimmed.starts_with("</stream:stream")
        || (trimmed.starts_with("<close") && trimmed.contains(ns::FRAMING))
    {
        inner.state.lock().unwrap().negotiator.handle_stream_end();
        return;
    }

    let element = match parse_unit(trimmed) {
        Ok(element) => element,
        Err(e) => {
            warn!(error = %e, "Dropping unparseable unit");
            return;
        }
    };

    if element.ns() == ns::SM {
        handle_sm_element(inner, &element, effects);
        return;
    }

    let bound = inner.state.lock().unwrap().negotiator.is_bound();
    if bound {
        dispatch_element(inner, element, effects);
    } else {
        let mut state = inner.state.lock().unwrap();
        let actions = state.negotiator.handle_element(&element);
        apply_negotiator_actions(inner, &mut state, actions, effects);
    }
}

fn apply_negotiator_actions(
    inner: &Arc<ConnectionInner>,
    state: &mut EngineState,
    actions: Vec<NegotiatorAction>,
    effects: &mut Effects,
) {
    for action in actions {
        match action {
            NegotiatorAction::Send(text) => effects.send.push(text),
            NegotiatorAction::Authenticated => {
                effects.events.push(SessionEvent::Authenticated);
            }
            NegotiatorAction::StreamNegotiated => {
                effects.events.push(SessionEvent::StreamNegotiated);
                if state.negotiator.is_resume_mode() {
                    let mut sm = inner.sm.lock().unwrap();
                    match sm.resume_xml() {
                        Some(resume) => effects.send.push(resume),
                        None => {
                            effects.fatal = Some(XmppError::protocol(
                                "Resume attempted without a resumption id",
                            ));
                        }
                    }
                }
            }
            NegotiatorAction::Bound(jid) => {
                *inner.bound.lock().unwrap() = Some(jid.clone());
                effects.events.push(SessionEvent::SessionStart(jid));
                if state.negotiator.features().contains(ns::SM) {
                    let enable = inner.sm.lock().unwrap().enable_xml();
                    effects.send.push(enable);
                    install_sm_interceptors(inner, state);
                } else {
                    debug!("Peer does not advertise stream management");
                }
            }
            NegotiatorAction::Fatal(e) => effects.fatal = Some(e),
        }
    }
}

/// Hook stream-management counting into the interceptor chains.
///
/// Counting lives in interceptors like any other cross-cutting transform;
/// the closures capture only the shared counter state, never the connection.
fn install_sm_interceptors(inner: &Arc<ConnectionInner>, state: &mut EngineState) {
    if state.sm_hooked {
        return;
    }
    state.sm_hooked = true;

    let sm = Arc::clone(&inner.sm);
    state.dispatcher.register_interceptor(
        Direction::Send,
        Box::new(move |element| {
            sm.lock().unwrap().count_outbound(element.name());
            element
        }),
    );
    let sm = Arc::clone(&inner.sm);
    state.dispatcher.register_interceptor(
        Direction::Receive,
        Box::new(move |element| {
            sm.lock().unwrap().count_inbound(element.name());
            element
        }),
    );
}

fn handle_sm_element(inner: &Arc<ConnectionInner>, element: &Element, effects: &mut Effects) {
    let mut sm = inner.sm.lock().unwrap();
    match element.name() {
        // An ack request is always answered, regardless of interval timing.
        "r" => effects.send.push(sm.answer_xml()),
        "a" => match SmAck::from_element(element) {
            Ok(ack) => sm.handle_ack(ack),
            Err(e) => warn!(error = %e, "Malformed ack"),
        },
        "enabled" => match SmEnabled::from_element(element) {
            Ok(enabled) => sm.handle_enabled(enabled),
            Err(e) => warn!(error = %e, "Malformed enabled response"),
        },
        "resumed" => match SmAck::from_element(element) {
            Ok(ack) => {
                sm.handle_resumed(ack);
                drop(sm);
                inner.state.lock().unwrap().negotiator.mark_resumed();
                effects.events.push(SessionEvent::Resumed);
            }
            Err(e) => {
                effects.fatal = Some(XmppError::protocol(format!("Malformed resumed: {}", e)));
            }
        },
        "failed" => {
            if sm.handle_failed() {
                effects.fatal = Some(XmppError::transport("Stream resumption refused by peer"));
            }
        }
        other => warn!(name = other, "Unknown stream management element"),
    }
}

fn dispatch_element(inner: &Arc<ConnectionInner>, element: Element, effects: &mut Effects) {
    let mut state = inner.state.lock().unwrap();
    let element = state
        .dispatcher
        .apply_interceptors(Direction::Receive, element);

    let class = StanzaClass::of(element.name());
    if class.is_stanza() {
        // Resolve before fan-out; the stanza still dispatches to events.
        inner.correlator.try_resolve(class, &element);
    }

    let (stanza, matched) = state.dispatcher.dispatch(element);
    drop(state);

    for name in matched {
        effects.events.push(SessionEvent::Custom {
            name,
            stanza: stanza.clone(),
        });
    }
    effects.events.push(SessionEvent::Stanza(stanza));
}

/// The transport is gone: either finish the disconnect or attempt
/// stream-management resumption. Returns true when the pump should keep
/// running on a freshly connected transport.
async fn handle_session_end(
    inner: &Arc<ConnectionInner>,
    rx: &mut mpsc::Receiver<TransportEvent>,
) -> bool {
    let closing = inner.state.lock().unwrap().closing;
    if closing {
        // disconnect() owns the teardown and its events.
        return false;
    }

    inner.state.lock().unwrap().negotiator.mark_session_end();
    emit(inner, SessionEvent::SessionEnd);

    let resumable = inner.sm.lock().unwrap().is_resumable();
    if !resumable {
        inner.correlator.clear();
        emit(inner, SessionEvent::Disconnected);
        return false;
    }

    info!("Unexpected disconnect with resumable session, reconnecting");
    let endpoint = Endpoint::from_config(&inner.config, &inner.domain);
    {
        let mut state = inner.state.lock().unwrap();
        state.framer.reset();
        state.negotiator.reset_for_resume();
    }

    // Sequential: the old transport is fully closed before the new attempt.
    let mut transport = inner.transport.lock().await;
    let _ = transport.close().await;
    match transport.connect(&endpoint).await {
        Ok(new_rx) => {
            *rx = new_rx;
            true
        }
        Err(e) => {
            // The caller sees the disconnect it would have seen without
            // stream management.
            error!(error = %e, "Resumption reconnect failed");
            *inner.last_error.lock().unwrap() = Some(e);
            inner.correlator.clear();
            emit(inner, SessionEvent::Disconnected);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Transport that rejects everything, for pre-connect behavior.
    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        fn framing(&self) -> FramingStyle {
            FramingStyle::Stream
        }

        async fn connect(
            &mut self,
            _endpoint: &Endpoint,
        ) -> Result<mpsc::Receiver<TransportEvent>, XmppError> {
            Err(XmppError::transport("null transport never connects"))
        }

        async fn send(&mut self, _data: &str) -> Result<(), XmppError> {
            Err(XmppError::transport("null transport never sends"))
        }

        async fn close(&mut self) -> Result<(), XmppError> {
            Ok(())
        }
    }

    fn connection() -> Connection {
        Connection::new(
            "user@example.com",
            "secret",
            Box::new(NullTransport),
            ClientConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_jid_must_have_local_part() {
        let result = Connection::new(
            "example.com",
            "secret",
            Box::new(NullTransport),
            ClientConfig::default(),
        );
        assert!(matches!(result, Err(XmppError::Config(_))));
    }

    #[tokio::test]
    async fn test_validation_precedes_transport_write() {
        let conn = connection();

        // A message without a recipient fails validation, not transport.
        let message = Element::builder("message", ns::JABBER_CLIENT).build();
        assert!(matches!(
            conn.send(message).await,
            Err(XmppError::Protocol(_))
        ));

        // A valid message reaches the (rejecting) transport.
        let message = Element::builder("message", ns::JABBER_CLIENT)
            .attr("to", "peer@example.com")
            .build();
        assert!(matches!(
            conn.send(message).await,
            Err(XmppError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_propagates() {
        let conn = connection();
        assert!(matches!(
            conn.connect().await,
            Err(XmppError::Transport(_))
        ));
    }

    #[test]
    fn test_weak_handle_drops_with_connection() {
        let conn = connection();
        let weak = conn.downgrade();
        assert!(weak.upgrade().is_some());
        drop(conn);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_plugin_lookup_before_registration_fails() {
        let conn = connection();
        let result = conn.with_plugin::<DummyPlugin, _>("nope", |_| ());
        assert!(matches!(result, Err(XmppError::PluginNotRegistered(_))));
    }

    struct DummyPlugin;

    impl Plugin for DummyPlugin {
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }
}
