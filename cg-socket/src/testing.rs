//! In-memory transport for exercising the session manager.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use cg_core::error::{CgError, CgResult};

use crate::events::LifecycleEvent;
use crate::transport::{OpenedSession, Transport, TransportConfig, TransportEvent, TransportSession};

/// How newly opened sessions behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MockBehavior {
    /// Connect immediately.
    Accept,
    /// Report `connect_error` immediately.
    Refuse,
    /// Report `connect_timeout` immediately.
    Timeout,
    /// Stay quiet until the test drives the session.
    Silent,
}

#[derive(Default)]
struct MockShared {
    live: AtomicBool,
    closed: AtomicBool,
    /// Emits fail while the handle still reports itself live.
    broken: AtomicBool,
    emitted: Mutex<Vec<(String, Value)>>,
    requests: Mutex<VecDeque<(String, oneshot::Sender<Value>)>>,
}

struct MockRecord {
    config: TransportConfig,
    events: mpsc::UnboundedSender<TransportEvent>,
    shared: Arc<MockShared>,
}

struct MockState {
    behavior: MockBehavior,
    sessions: Vec<MockRecord>,
}

/// Records every opened session and what was emitted on it.
#[derive(Clone)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                behavior,
                sessions: Vec::new(),
            })),
        }
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        self.state.lock().unwrap().behavior = behavior;
    }

    /// Number of sessions opened so far.
    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    pub fn config(&self, index: usize) -> TransportConfig {
        self.state.lock().unwrap().sessions[index].config.clone()
    }

    pub fn emitted(&self, index: usize) -> Vec<(String, Value)> {
        self.with_session(index, |s| s.emitted.lock().unwrap().clone())
    }

    /// Texts of every emitted envelope, across sessions, in order.
    pub fn emitted_texts(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .sessions
            .iter()
            .flat_map(|r| r.shared.emitted.lock().unwrap().clone())
            .filter_map(|(_, body)| body.get("text").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    pub fn is_closed(&self, index: usize) -> bool {
        self.with_session(index, |s| s.closed.load(Ordering::SeqCst))
    }

    /// Deliver an event on a session.
    pub fn inject(&self, index: usize, event: TransportEvent) {
        let state = self.state.lock().unwrap();
        let _ = state.sessions[index].events.send(event);
    }

    /// Bring a silent session up.
    pub fn accept(&self, index: usize) {
        self.with_session(index, |s| s.live.store(true, Ordering::SeqCst));
        self.inject(index, TransportEvent::lifecycle(LifecycleEvent::Connect, Value::Null));
    }

    /// Lose the connection from the server side.
    pub fn drop_connection(&self, index: usize) {
        self.with_session(index, |s| s.live.store(false, Ordering::SeqCst));
        self.inject(
            index,
            TransportEvent::lifecycle(LifecycleEvent::Disconnect, json!("transport close")),
        );
    }

    /// Make every further emit fail while the handle still looks live.
    pub fn break_writes(&self, index: usize) {
        self.with_session(index, |s| s.broken.store(true, Ordering::SeqCst));
    }

    /// Names of the requests still waiting for a reply.
    pub fn pending_requests(&self, index: usize) -> Vec<String> {
        self.with_session(index, |s| {
            s.requests.lock().unwrap().iter().map(|(name, _)| name.clone()).collect()
        })
    }

    /// Acknowledge the oldest pending request.
    pub fn reply(&self, index: usize, payload: Value) {
        let waiter = self.with_session(index, |s| s.requests.lock().unwrap().pop_front());
        if let Some((_, waiter)) = waiter {
            let _ = waiter.send(payload);
        }
    }

    /// Make the handle report itself dead without any event.
    pub fn sever(&self, index: usize) {
        self.with_session(index, |s| s.live.store(false, Ordering::SeqCst));
    }

    fn with_session<T>(&self, index: usize, f: impl FnOnce(&MockShared) -> T) -> T {
        let state = self.state.lock().unwrap();
        f(&state.sessions[index].shared)
    }
}

impl Transport for MockTransport {
    fn open(&self, config: &TransportConfig) -> CgResult<OpenedSession> {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(MockShared::default());

        let mut state = self.state.lock().unwrap();
        match state.behavior {
            MockBehavior::Accept => {
                shared.live.store(true, Ordering::SeqCst);
                let _ = tx.send(TransportEvent::lifecycle(LifecycleEvent::Connect, Value::Null));
            }
            MockBehavior::Refuse => {
                let _ = tx.send(TransportEvent::lifecycle(
                    LifecycleEvent::ConnectError,
                    json!("connection refused"),
                ));
            }
            MockBehavior::Timeout => {
                let _ = tx.send(TransportEvent::lifecycle(LifecycleEvent::ConnectTimeout, json!(20_000)));
            }
            MockBehavior::Silent => {}
        }

        state.sessions.push(MockRecord {
            config: config.clone(),
            events: tx,
            shared: shared.clone(),
        });

        Ok(OpenedSession {
            session: Box::new(MockSession { shared }),
            events: rx,
        })
    }
}

struct MockSession {
    shared: Arc<MockShared>,
}

impl TransportSession for MockSession {
    fn emit(&self, event: &str, payload: Value) -> CgResult<()> {
        if !self.is_connected() {
            return Err(CgError::NotConnected);
        }
        if self.shared.broken.load(Ordering::SeqCst) {
            return Err(CgError::Transport("write failed".into()));
        }
        self.shared
            .emitted
            .lock()
            .unwrap()
            .push((event.to_string(), payload));
        Ok(())
    }

    fn request(&self, event: &str, _payload: Value) -> CgResult<oneshot::Receiver<Value>> {
        if !self.is_connected() {
            return Err(CgError::NotConnected);
        }
        let (tx, rx) = oneshot::channel();
        self.shared
            .requests
            .lock()
            .unwrap()
            .push_back((event.to_string(), tx));
        Ok(rx)
    }

    fn is_connected(&self) -> bool {
        self.shared.live.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        self.shared.live.store(false, Ordering::SeqCst);
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.requests.lock().unwrap().clear();
    }
}
