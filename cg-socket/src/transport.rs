//! Transport abstraction.
//!
//! The session manager never talks to sockets directly. It asks a
//! [`Transport`] to open a [`TransportSession`] for a [`TransportConfig`] and
//! consumes the [`TransportEvent`]s that session produces. The production
//! implementation is [`SocketIoTransport`](crate::io_transport::SocketIoTransport);
//! tests substitute a mock.

use std::time::Duration;

use reqwest::Url;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use cg_core::config::{ClientConfig, SessionOptions, TransportPreference};
use cg_core::constants::query;
use cg_core::error::{CgError, CgResult};

use crate::engineio;
use crate::events::LifecycleEvent;

/// Wire transport kinds, in Engine.IO naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Polling,
    WebSocket,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Polling => "polling",
            Self::WebSocket => "websocket",
        }
    }
}

/// Everything needed to open one transport session.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// `scheme://host[:port]` of the endpoint.
    pub origin: String,
    /// Socket path, `/socket.io` or `<endpoint path>/socket.io`.
    pub path: String,
    /// Transports to try, in order.
    pub transports: Vec<TransportKind>,
    /// Extra query parameters sent when opening.
    pub query: Vec<(String, String)>,
    /// Give up opening after this long.
    pub connect_timeout: Duration,
}

impl TransportConfig {
    /// Derive the transport configuration for a session.
    ///
    /// An endpoint URL with a non-root path keeps that path as a prefix for
    /// the socket path while connecting to the origin.
    pub fn for_session(url: &str, url_token: &str, options: &SessionOptions) -> CgResult<Self> {
        let sanitized = ClientConfig::sanitize_endpoint(url);
        let parsed = Url::parse(&sanitized).map_err(|e| CgError::InvalidUrl(format!("{url}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| CgError::InvalidUrl(format!("{url}: missing host")))?;

        let origin = match parsed.port() {
            Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
            None => format!("{}://{host}", parsed.scheme()),
        };

        let prefix = parsed.path().trim_end_matches('/');
        let path = format!("{prefix}/socket.io");

        let transports = match options.transport {
            TransportPreference::ForceStreaming => vec![TransportKind::WebSocket],
            TransportPreference::ForcePolling => vec![TransportKind::Polling],
            TransportPreference::Auto => vec![TransportKind::Polling, TransportKind::WebSocket],
        };

        let query = if options.uses_in_band_handshake() {
            vec![(query::IN_BAND_HANDSHAKE.to_string(), "true".to_string())]
        } else {
            vec![
                (query::SESSION_ID.to_string(), options.session_id.clone()),
                (query::URL_TOKEN.to_string(), url_token.to_string()),
                (query::USER_ID.to_string(), options.user_id.clone()),
                (query::TEST_MODE.to_string(), options.test_mode.to_string()),
            ]
        };

        Ok(Self {
            origin,
            path,
            transports,
            query,
            connect_timeout: options.connect_timeout,
        })
    }

    /// Engine.IO handshake URL for one transport kind.
    pub fn endpoint_url(&self, kind: TransportKind) -> CgResult<Url> {
        let mut url = Url::parse(&self.origin).map_err(|e| CgError::InvalidUrl(e.to_string()))?;
        url.set_path(&format!("{}/", self.path));
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("EIO", &engineio::PROTOCOL_VERSION.to_string());
            pairs.append_pair("transport", kind.as_str());
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
        }

        if kind == TransportKind::WebSocket {
            let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
            url.set_scheme(scheme)
                .map_err(|_| CgError::InvalidUrl(format!("cannot use {scheme} for {}", self.origin)))?;
        }

        Ok(url)
    }

    /// Value of one query parameter, if set.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// One-shot acknowledgement callback attached to an inbound event.
pub struct Ack {
    reply: Box<dyn FnOnce(Value) + Send>,
}

impl Ack {
    pub fn new(reply: impl FnOnce(Value) + Send + 'static) -> Self {
        Self {
            reply: Box::new(reply),
        }
    }

    /// Answer the request.
    pub fn send(self, payload: Value) {
        (self.reply)(payload)
    }
}

impl std::fmt::Debug for Ack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Ack")
    }
}

/// What an open transport session reports.
#[derive(Debug)]
pub enum TransportEvent {
    /// Connection lifecycle signal. `Disconnect`, `ConnectError` and
    /// `ConnectTimeout` are terminal for the session.
    Lifecycle { kind: LifecycleEvent, detail: Value },
    /// Named application event with its first argument.
    Message {
        name: String,
        payload: Value,
        ack: Option<Ack>,
    },
}

impl TransportEvent {
    pub fn lifecycle(kind: LifecycleEvent, detail: Value) -> Self {
        Self::Lifecycle { kind, detail }
    }
}

/// Handle to one open transport session.
pub trait TransportSession: Send + Sync {
    /// Emit a named event. Fails when the session is not connected.
    fn emit(&self, event: &str, payload: Value) -> CgResult<()>;

    /// Emit a named event that asks for an acknowledgement. The receiver
    /// yields the first reply argument, or closes if the session ends first.
    fn request(&self, event: &str, payload: Value) -> CgResult<oneshot::Receiver<Value>>;

    /// Whether the session currently reports itself live.
    fn is_connected(&self) -> bool;

    /// Close the session. Idempotent; no events follow.
    fn disconnect(&self);
}

/// A freshly opened session and its event stream.
pub struct OpenedSession {
    pub session: Box<dyn TransportSession>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Factory for transport sessions.
pub trait Transport: Send + Sync {
    /// Start opening a session. Connection progress is reported on the
    /// returned event stream.
    fn open(&self, config: &TransportConfig) -> CgResult<OpenedSession>;
}
