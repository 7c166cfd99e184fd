//! Client event types and event dispatcher.
//!
//! Everything a session observes is published as one of a closed set of
//! [`ClientEvent`]s on a broadcast channel. Protocol-level events (output,
//! errors, end-of-turn pings) are kept apart from raw transport lifecycle
//! noise, which is re-published under a `socket/` prefix.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::debug;

/// Raw lifecycle signals a transport can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Connect,
    ConnectError,
    ConnectTimeout,
    Error,
    Disconnect,
    Reconnect,
    ReconnectAttempt,
    Reconnecting,
    ReconnectError,
    ReconnectFailed,
    Ping,
    Pong,
}

impl LifecycleEvent {
    /// The transport's own name for this signal.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::ConnectError => "connect_error",
            Self::ConnectTimeout => "connect_timeout",
            Self::Error => "error",
            Self::Disconnect => "disconnect",
            Self::Reconnect => "reconnect",
            Self::ReconnectAttempt => "reconnect_attempt",
            Self::Reconnecting => "reconnecting",
            Self::ReconnectError => "reconnect_error",
            Self::ReconnectFailed => "reconnect_failed",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }

    /// Parse a transport signal name.
    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|e| e.as_str() == s)
    }

    /// Every lifecycle signal.
    pub fn all() -> &'static [LifecycleEvent] {
        &[
            Self::Connect,
            Self::ConnectError,
            Self::ConnectTimeout,
            Self::Error,
            Self::Disconnect,
            Self::Reconnect,
            Self::ReconnectAttempt,
            Self::Reconnecting,
            Self::ReconnectError,
            Self::ReconnectFailed,
            Self::Ping,
            Self::Pong,
        ]
    }

    /// Name under which the signal is re-published to subscribers.
    pub fn namespaced(&self) -> String {
        format!("socket/{}", self.as_str())
    }
}

/// Text and structured data produced by the backend for one output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Output {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    /// Any further fields the backend attached.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// How an end-of-turn marker reached the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalPingFraming {
    /// Inside the `output` envelope as `{type: "finalPing", data}`.
    Enveloped,
    /// As a dedicated top-level `finalPing` event.
    Dedicated,
}

/// End-of-turn marker. The payload differs across backend versions and is
/// passed through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalPing {
    pub framing: FinalPingFraming,
    pub payload: Value,
}

/// Events published by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The session reached the connected state (after any handshake).
    Connected,
    /// An established connection went away.
    Disconnected { reason: String },
    /// Backend output.
    Output(Output),
    /// Backend reported an error for the last input. Not fatal.
    Error(Value),
    /// End of the backend's turn.
    FinalPing(FinalPing),
    /// Backend-side processing fault. Not fatal.
    Exception(Value),
    /// Typing indicator hint.
    TypingStatus(Value),
    /// Raw transport lifecycle signal.
    Transport { kind: LifecycleEvent, detail: Value },
    /// Automatic reconnection gave up.
    ReconnectExhausted { attempts: u32 },
}

impl ClientEvent {
    /// Stable event name, for logging and for hosts that route by name.
    pub fn name(&self) -> String {
        match self {
            Self::Connected => "connect".into(),
            Self::Disconnected { .. } => "disconnect".into(),
            Self::Output(_) => "output".into(),
            Self::Error(_) => "error".into(),
            Self::FinalPing(_) => "finalPing".into(),
            Self::Exception(_) => "exception".into(),
            Self::TypingStatus(_) => "typingStatus".into(),
            Self::Transport { kind, .. } => kind.namespaced(),
            Self::ReconnectExhausted { .. } => "reconnectExhausted".into(),
        }
    }

    /// Whether this is raw transport noise rather than a protocol event.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// Broadcast-based event dispatcher.
///
/// Uses tokio::broadcast channels so multiple consumers can independently
/// receive and process events without blocking each other.
#[derive(Clone)]
pub struct EventDispatcher {
    sender: broadcast::Sender<ClientEvent>,
}

impl EventDispatcher {
    /// Create a new EventDispatcher with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to receive client events.
    ///
    /// Returns a broadcast receiver. Slow consumers that fall behind
    /// will receive a RecvError::Lagged and may miss events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    /// Dispatch an event to all active subscribers.
    pub fn dispatch(&self, event: ClientEvent) {
        let name = event.name();
        match self.sender.send(event) {
            Ok(count) => {
                debug!("dispatched {name} to {count} subscriber(s)");
            }
            Err(_) => {
                debug!("no subscribers for event {name}");
            }
        }
    }

    /// Get the current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport session and no attempt in flight.
    Disconnected,
    /// Transport session opened, waiting for it to connect.
    Connecting,
    /// Transport connected, waiting for the backend's handshake request.
    AwaitingHandshake,
    /// Ready to send.
    Connected,
    /// The watchdog found the connection down and is retrying.
    Reconnecting,
    /// Retry budget spent. A caller `connect()` starts over.
    GaveUp,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::AwaitingHandshake => write!(f, "awaiting-handshake"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::GaveUp => write!(f, "gave-up"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_names() {
        assert_eq!(LifecycleEvent::parse("connect_error"), Some(LifecycleEvent::ConnectError));
        assert_eq!(LifecycleEvent::parse("reconnect_attempt"), Some(LifecycleEvent::ReconnectAttempt));
        assert_eq!(LifecycleEvent::parse("output"), None);
        for kind in LifecycleEvent::all() {
            assert_eq!(LifecycleEvent::parse(kind.as_str()), Some(*kind));
        }
    }

    #[test]
    fn test_transport_events_are_namespaced() {
        let event = ClientEvent::Transport {
            kind: LifecycleEvent::Pong,
            detail: Value::Null,
        };
        assert_eq!(event.name(), "socket/pong");
        assert!(event.is_transport());
        assert!(!ClientEvent::Connected.is_transport());
        assert_eq!(ClientEvent::Connected.name(), "connect");
    }

    #[tokio::test]
    async fn test_event_dispatcher() {
        let dispatcher = EventDispatcher::new(16);
        let mut rx = dispatcher.subscribe();
        assert_eq!(dispatcher.subscriber_count(), 1);

        dispatcher.dispatch(ClientEvent::TypingStatus(serde_json::json!("typingOn")));

        let event = rx.recv().await.unwrap();
        assert_eq!(event, ClientEvent::TypingStatus(serde_json::json!("typingOn")));
    }

    #[test]
    fn test_dispatch_without_subscribers_is_fine() {
        let dispatcher = EventDispatcher::new(4);
        dispatcher.dispatch(ClientEvent::Connected);
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::AwaitingHandshake.to_string(), "awaiting-handshake");
        assert_eq!(ConnectionState::GaveUp.to_string(), "gave-up");
    }

    #[test]
    fn test_output_payload() {
        let json = serde_json::json!({"text": "hello", "data": {"a": 1}});
        let output: Output = serde_json::from_value(json).unwrap();
        assert_eq!(output.text.as_deref(), Some("hello"));
        assert_eq!(output.data.unwrap()["a"], 1);

        let empty: Output = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(empty, Output::default());
    }
}
