//! Session lifecycle manager.
//!
//! [`SessionClient`] owns at most one transport session at a time, buffers
//! messages while it is not connected, and runs a watchdog that re-opens the
//! session when it drops. All mutable state sits behind one mutex that is
//! never held across an `.await`; every transition is a single critical
//! section, whether it is triggered by a caller, the transport event pump,
//! or the watchdog.
//!
//! Each attempt to open a session bumps a generation counter. Events from
//! older generations are ignored, so a superseded or torn-down attempt can
//! never touch the current one.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use cg_api::TokenSource;
use cg_core::config::{ClientConfig, SessionOptions};
use cg_core::constants::{events, DEFAULT_EVENT_CAPACITY};
use cg_core::error::{CgError, CgResult};
use cg_core::RuntimeCapabilities;

use crate::buffer::{MessageBuffer, PendingMessage};
use crate::envelope;
use crate::events::{ClientEvent, ConnectionState, EventDispatcher, LifecycleEvent};
use crate::io_transport::SocketIoTransport;
use crate::markup::strip_markup;
use crate::reconnect::ReconnectPolicy;
use crate::transport::{Ack, Transport, TransportConfig, TransportEvent, TransportSession};
use crate::watchdog::Watchdog;

type ConnectResult = oneshot::Receiver<CgResult<()>>;

/// Client for one conversational session.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionClient {
    shared: Arc<Shared>,
}

struct Shared {
    url: String,
    url_token: String,
    options: SessionOptions,
    transport: Arc<dyn Transport>,
    dispatcher: EventDispatcher,
    state_tx: watch::Sender<ConnectionState>,
    inner: Mutex<Inner>,
}

struct Inner {
    state: ConnectionState,
    generation: u64,
    session: Option<Box<dyn TransportSession>>,
    /// Resolves the caller waiting on the current attempt.
    pending: Option<oneshot::Sender<CgResult<()>>>,
    pump: Option<JoinHandle<()>>,
    buffer: MessageBuffer,
    policy: ReconnectPolicy,
    last_used: Instant,
    watchdog: Watchdog,
}

impl SessionClient {
    /// Create a client. Nothing happens on the network until
    /// [`connect`](Self::connect).
    pub fn new(
        url: impl Into<String>,
        url_token: impl Into<String>,
        options: SessionOptions,
        transport: Arc<dyn Transport>,
        dispatcher: EventDispatcher,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let url = url.into();
        debug!(
            "session client for {url} (user={}, session={}, transport={})",
            options.user_id, options.session_id, options.transport
        );

        let inner = Inner {
            state: ConnectionState::Disconnected,
            generation: 0,
            session: None,
            pending: None,
            pump: None,
            buffer: MessageBuffer::new(),
            policy: ReconnectPolicy::new(options.reconnect.max_attempts),
            last_used: Instant::now(),
            watchdog: Watchdog::new(),
        };

        Self {
            shared: Arc::new(Shared {
                url,
                url_token: url_token.into(),
                options,
                transport,
                dispatcher,
                state_tx,
                inner: Mutex::new(inner),
            }),
        }
    }

    /// Create a client backed by the Socket.IO transport.
    pub fn with_socket_io(
        url: impl Into<String>,
        url_token: impl Into<String>,
        options: SessionOptions,
    ) -> CgResult<Self> {
        Ok(Self::new(
            url,
            url_token,
            options,
            Arc::new(SocketIoTransport::new()?),
            EventDispatcher::new(DEFAULT_EVENT_CAPACITY),
        ))
    }

    /// Create a Socket.IO client from on-disk configuration, logging in
    /// first when no direct token is configured.
    pub async fn from_config(config: &ClientConfig, capabilities: &RuntimeCapabilities) -> CgResult<Self> {
        if config.endpoint.url.is_empty() {
            return Err(CgError::MissingConfig("endpoint url".into()));
        }

        let options = config.session_options(capabilities);
        let source = TokenSource::from_endpoint(&config.endpoint, &options.channel, options.connect_timeout)?;
        let token = source.resolve().await?;

        Self::with_socket_io(config.endpoint.url.clone(), token, options)
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn options(&self) -> &SessionOptions {
        &self.shared.options
    }

    /// Get the event dispatcher (for subscribing to events).
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.shared.dispatcher
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.dispatcher.subscribe()
    }

    /// Subscribe to connection state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Whether messages sent now go straight out.
    pub fn connected(&self) -> bool {
        Shared::is_live(&self.shared.lock())
    }

    /// Whether the session has been idle longer than its configured
    /// lifetime. Always `false` without one.
    pub fn expired(&self) -> bool {
        let inner = self.shared.lock();
        self.shared
            .options
            .expires_in
            .is_some_and(|limit| inner.last_used.elapsed() > limit)
    }

    /// Messages waiting for the connection.
    pub fn buffered_messages(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    /// Failed reconnect attempts since the last successful send or connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.lock().policy.attempt_count()
    }

    pub fn is_watchdog_armed(&self) -> bool {
        self.shared.lock().watchdog.is_armed()
    }

    /// Open the session and wait until it is ready to send.
    ///
    /// Resolves immediately if already connected. Any attempt still in
    /// flight is superseded and resolves with
    /// [`CgError::ConnectCancelled`], as does this one if
    /// [`disconnect`](Self::disconnect) is called before it completes.
    pub async fn connect(&self) -> CgResult<()> {
        match self.shared.begin_attempt(false)? {
            Some(result) => result.await.unwrap_or(Err(CgError::ConnectCancelled)),
            None => Ok(()),
        }
    }

    /// Close the session and stop reconnecting. Safe to call in any state
    /// and more than once.
    pub fn disconnect(&self) -> &Self {
        let shared = &self.shared;
        let mut guard = shared.lock();
        let inner = &mut *guard;

        inner.watchdog.disarm();
        let was_connected = inner.state == ConnectionState::Connected;
        shared.release_session(inner);
        inner.generation += 1;
        shared.set_state(inner, ConnectionState::Disconnected);

        if was_connected {
            info!("session disconnected");
            shared.dispatcher.dispatch(ClientEvent::Disconnected {
                reason: "io client disconnect".into(),
            });
        }
        self
    }

    /// Send a message, or buffer it until the session is connected.
    pub fn send_message(&self, text: impl Into<String>, data: Option<Value>) -> &Self {
        let mut guard = self.shared.lock();
        self.shared.deliver(&mut guard, PendingMessage::new(text, data));
        self
    }

    /// Emit an arbitrary named event. Unlike messages, events are not
    /// buffered.
    pub fn send_event(&self, name: &str, payload: Value) -> CgResult<()> {
        let inner = self.shared.lock();
        if !Shared::is_live(&inner) {
            return Err(CgError::NotConnected);
        }
        match inner.session.as_ref() {
            Some(session) => session.emit(name, payload),
            None => Err(CgError::NotConnected),
        }
    }

    /// Emit a named event and wait for the backend's acknowledgement.
    ///
    /// Like [`send_event`](Self::send_event) this needs a live session. If
    /// the session ends before the reply arrives the call fails with
    /// [`CgError::Connection`].
    pub async fn request(&self, name: &str, payload: Value) -> CgResult<Value> {
        let reply = {
            let inner = self.shared.lock();
            if !Shared::is_live(&inner) {
                return Err(CgError::NotConnected);
            }
            match inner.session.as_ref() {
                Some(session) => session.request(name, payload)?,
                None => return Err(CgError::NotConnected),
            }
        };
        reply
            .await
            .map_err(|_| CgError::Connection(format!("session closed before {name} was acknowledged")))
    }

    /// Reset the conversation state; returns the state now in effect.
    pub async fn reset_state(&self) -> CgResult<Value> {
        self.request(events::RESET_STATE, Value::Null).await
    }

    /// Reset the conversation context; returns the context now in effect.
    pub async fn reset_context(&self) -> CgResult<Value> {
        self.request(events::RESET_CONTEXT, Value::Null).await
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_live(inner: &Inner) -> bool {
        inner.state == ConnectionState::Connected
            && inner.session.as_ref().is_some_and(|s| s.is_connected())
    }

    fn set_state(&self, inner: &mut Inner, new_state: ConnectionState) {
        if inner.state != new_state {
            info!("session state: {} -> {}", inner.state, new_state);
            inner.state = new_state;
            self.state_tx.send_replace(new_state);
        }
    }

    /// Close the current session and cancel its pump. Whoever waits on the
    /// attempt sees it cancelled.
    fn release_session(&self, inner: &mut Inner) {
        if let Some(session) = inner.session.take() {
            session.disconnect();
        }
        if let Some(pump) = inner.pump.take() {
            pump.abort();
        }
        inner.pending = None;
    }

    /// Like `release_session`, but for use from inside the pump itself.
    fn end_session(&self, inner: &mut Inner) {
        if let Some(session) = inner.session.take() {
            session.disconnect();
        }
        inner.pump = None;
    }

    /// Open a new transport session, replacing any current one. `None`
    /// when already connected.
    fn begin_attempt(self: &Arc<Self>, from_watchdog: bool) -> CgResult<Option<ConnectResult>> {
        let config = TransportConfig::for_session(&self.url, &self.url_token, &self.options)?;

        let mut guard = self.lock();
        let inner = &mut *guard;
        if Self::is_live(inner) {
            debug!("already connected");
            return Ok(None);
        }
        if !from_watchdog && inner.state == ConnectionState::GaveUp {
            info!("restarting reconnect cycle");
            inner.policy.reset();
        }

        self.release_session(inner);
        inner.generation += 1;
        let generation = inner.generation;

        info!(
            "connecting to {}{} via {:?}",
            config.origin,
            config.path,
            config.transports.iter().map(|t| t.as_str()).collect::<Vec<_>>()
        );
        let opened = match self.transport.open(&config) {
            Ok(opened) => opened,
            Err(e) => {
                warn!("failed to open transport: {e}");
                self.set_state(inner, ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let (tx, rx) = oneshot::channel();
        inner.session = Some(opened.session);
        inner.pending = Some(tx);
        inner.pump = Some(tokio::spawn(pump(Arc::downgrade(self), generation, opened.events)));

        let next = if from_watchdog {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        };
        self.set_state(inner, next);
        Ok(Some(rx))
    }

    /// Apply one transport event. Returns `false` once the session is over.
    fn handle_event(self: &Arc<Self>, generation: u64, event: TransportEvent) -> bool {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.generation != generation {
            debug!("ignoring event from stale session {generation}");
            return false;
        }

        match event {
            TransportEvent::Lifecycle { kind, detail } => {
                debug!("transport {}", kind.as_str());
                self.dispatcher.dispatch(ClientEvent::Transport {
                    kind,
                    detail: detail.clone(),
                });
                match kind {
                    LifecycleEvent::Connect => self.on_connect(inner),
                    LifecycleEvent::ConnectError | LifecycleEvent::ConnectTimeout => {
                        self.on_connect_failed(inner, kind, &detail);
                        return false;
                    }
                    LifecycleEvent::Disconnect => {
                        self.on_disconnect(inner, &detail);
                        return false;
                    }
                    _ => {}
                }
            }
            TransportEvent::Message { name, payload, ack } => {
                if name == events::HANDSHAKE {
                    self.on_handshake(inner, ack);
                } else {
                    match envelope::route(&name, payload) {
                        Some(event) => self.dispatcher.dispatch(self.prepare(event)),
                        None => debug!("ignoring event {name}"),
                    }
                }
            }
        }
        true
    }

    fn on_connect(self: &Arc<Self>, inner: &mut Inner) {
        if self.options.uses_in_band_handshake() {
            debug!("waiting for handshake request");
            self.set_state(inner, ConnectionState::AwaitingHandshake);
        } else {
            self.mark_connected(inner);
        }
    }

    fn on_handshake(self: &Arc<Self>, inner: &mut Inner, ack: Option<Ack>) {
        match ack {
            Some(ack) => ack.send(envelope::handshake_reply(&self.options, &self.url_token)),
            None => warn!("handshake request without acknowledgement"),
        }

        if inner.state == ConnectionState::AwaitingHandshake {
            self.mark_connected(inner);
        } else {
            debug!("handshake request while {}", inner.state);
        }
    }

    fn mark_connected(self: &Arc<Self>, inner: &mut Inner) {
        self.set_state(inner, ConnectionState::Connected);
        inner.policy.reset();
        self.dispatcher.dispatch(ClientEvent::Connected);

        self.flush(inner);
        if self.options.reconnect.enabled {
            self.arm_watchdog(inner);
        }

        if let Some(pending) = inner.pending.take() {
            let _ = pending.send(Ok(()));
        }
    }

    fn on_connect_failed(&self, inner: &mut Inner, kind: LifecycleEvent, detail: &Value) {
        let error = match kind {
            LifecycleEvent::ConnectTimeout => {
                CgError::ConnectTimeout(self.options.connect_timeout.as_millis() as u64)
            }
            _ => CgError::Connection(detail_text(detail)),
        };
        warn!("connect failed: {error}");

        let pending = inner.pending.take();
        self.end_session(inner);
        self.set_state(inner, ConnectionState::Disconnected);
        if let Some(pending) = pending {
            let _ = pending.send(Err(error));
        }
    }

    fn on_disconnect(&self, inner: &mut Inner, detail: &Value) {
        let reason = detail_text(detail);
        let was_connected = inner.state == ConnectionState::Connected;

        let pending = inner.pending.take();
        self.end_session(inner);
        self.set_state(inner, ConnectionState::Disconnected);

        if let Some(pending) = pending {
            let _ = pending.send(Err(CgError::Connection(format!("closed before ready: {reason}"))));
        }
        if was_connected {
            warn!("connection lost: {reason}");
            self.dispatcher.dispatch(ClientEvent::Disconnected { reason });
        }
    }

    fn prepare(&self, event: ClientEvent) -> ClientEvent {
        match event {
            ClientEvent::Output(mut output) if self.options.strip_markup => {
                output.text = output.text.map(|text| strip_markup(&text));
                ClientEvent::Output(output)
            }
            other => other,
        }
    }

    /// Send now if connected; otherwise, or if the send fails, buffer.
    fn deliver(&self, inner: &mut Inner, message: PendingMessage) {
        if Self::is_live(inner) {
            let body = envelope::input_envelope(&self.options, &self.url_token, &message);
            let sent = match inner.session.as_ref() {
                Some(session) => session.emit(&self.options.envelope.event_name, body),
                None => Err(CgError::NotConnected),
            };
            match sent {
                Ok(()) => {
                    inner.policy.reset();
                    inner.last_used = Instant::now();
                    return;
                }
                Err(e) => warn!("send failed, buffering message: {e}"),
            }
        }

        inner.buffer.push(message);
        info!(
            "not connected, message buffered until the connection is back ({} pending)",
            inner.buffer.len()
        );
    }

    fn flush(&self, inner: &mut Inner) {
        if inner.buffer.is_empty() {
            return;
        }
        let pending = inner.buffer.drain();
        info!("sending {} buffered message(s)", pending.len());
        for message in pending {
            self.deliver(inner, message);
        }
    }

    fn arm_watchdog(self: &Arc<Self>, inner: &mut Inner) {
        let client = Arc::downgrade(self);
        inner.watchdog.arm(self.options.reconnect.interval, move || {
            let client = client.clone();
            async move {
                match client.upgrade() {
                    Some(shared) => {
                        shared.watchdog_tick().await;
                        ControlFlow::Continue(())
                    }
                    None => ControlFlow::Break(()),
                }
            }
        });
    }

    async fn watchdog_tick(self: &Arc<Self>) {
        {
            let inner = self.lock();
            if Self::is_live(&inner) {
                return;
            }
            if matches!(
                inner.state,
                ConnectionState::Connecting | ConnectionState::AwaitingHandshake
            ) {
                debug!("connect already in progress");
                return;
            }
            if inner.policy.should_stop_retrying() {
                debug!("reconnect attempts exhausted, waiting for an explicit connect");
                return;
            }
        }

        info!("connection is down, trying to reconnect");
        let result = match self.begin_attempt(true) {
            Ok(Some(result)) => result.await.unwrap_or(Err(CgError::ConnectCancelled)),
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => info!("reconnected"),
            Err(CgError::ConnectCancelled) => debug!("reconnect attempt superseded"),
            Err(e) => {
                let mut guard = self.lock();
                let inner = &mut *guard;
                let exhausted = inner.policy.register_attempt();
                let attempts = inner.policy.attempt_count();
                match inner.policy.max_attempts() {
                    0 => error!("reconnect attempt {attempts} failed: {e}"),
                    max => error!("reconnect attempt {attempts}/{max} failed: {e}"),
                }

                if exhausted {
                    error!("giving up after {attempts} reconnect attempts");
                    self.set_state(inner, ConnectionState::GaveUp);
                    self.dispatcher.dispatch(ClientEvent::ReconnectExhausted { attempts });
                }
            }
        }
    }
}

/// Feed one session's events into the manager until it ends or goes stale.
async fn pump(client: Weak<Shared>, generation: u64, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        let Some(shared) = client.upgrade() else {
            break;
        };
        if !shared.handle_event(generation, event) {
            break;
        }
    }
}

fn detail_text(detail: &Value) -> String {
    match detail {
        Value::String(text) => text.clone(),
        Value::Null => "unknown".into(),
        other => other.to_string(),
    }
}
