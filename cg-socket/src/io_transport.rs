//! Socket.IO client transport.
//!
//! Each opened session runs one background task that establishes the
//! Engine.IO link (trying transports in order), joins the default
//! namespace, and then shuttles packets until either side closes. Server
//! pings are answered automatically; a server that stays silent past its
//! advertised ping window is treated as gone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use cg_core::constants::CLIENT_VERSION;
use cg_core::error::{CgError, CgResult};

use crate::engineio::EnginePacket;
use crate::events::LifecycleEvent;
use crate::link::{self, EngineLink};
use crate::socketio::SocketPacket;
use crate::transport::{Ack, OpenedSession, Transport, TransportConfig, TransportEvent, TransportSession};

/// Requests from the session handle to its background task.
#[derive(Debug)]
enum Command {
    Emit { event: String, payload: Value },
    Request {
        event: String,
        payload: Value,
        reply: oneshot::Sender<Value>,
    },
    Ack { id: u64, payload: Value },
    Close,
}

/// Production [`Transport`] speaking Socket.IO v4 over Engine.IO v4.
#[derive(Clone)]
pub struct SocketIoTransport {
    http: reqwest::Client,
}

impl SocketIoTransport {
    pub fn new() -> CgResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("cognigy-socket-client/{CLIENT_VERSION}"))
            .cookie_store(true)
            .build()
            .map_err(|e| CgError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

impl Transport for SocketIoTransport {
    fn open(&self, config: &TransportConfig) -> CgResult<OpenedSession> {
        if config.transports.is_empty() {
            return Err(CgError::Config("no transports configured".into()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| CgError::Transport("socket sessions need a tokio runtime".into()))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        let task = SessionTask {
            config: config.clone(),
            http: self.http.clone(),
            events: events_tx,
            commands: commands_rx,
            acks: commands_tx.downgrade(),
            connected: connected.clone(),
            next_ack_id: 0,
            replies: HashMap::new(),
        };
        runtime.spawn(task.run());

        Ok(OpenedSession {
            session: Box::new(SocketIoSession {
                commands: commands_tx,
                connected,
            }),
            events: events_rx,
        })
    }
}

/// Handle to one Socket.IO session.
struct SocketIoSession {
    commands: mpsc::UnboundedSender<Command>,
    connected: Arc<AtomicBool>,
}

impl TransportSession for SocketIoSession {
    fn emit(&self, event: &str, payload: Value) -> CgResult<()> {
        if !self.is_connected() {
            return Err(CgError::NotConnected);
        }
        self.commands
            .send(Command::Emit {
                event: event.to_string(),
                payload,
            })
            .map_err(|_| CgError::Transport("session task has stopped".into()))
    }

    fn request(&self, event: &str, payload: Value) -> CgResult<oneshot::Receiver<Value>> {
        if !self.is_connected() {
            return Err(CgError::NotConnected);
        }
        let (reply, receiver) = oneshot::channel();
        self.commands
            .send(Command::Request {
                event: event.to_string(),
                payload,
                reply,
            })
            .map_err(|_| CgError::Transport("session task has stopped".into()))?;
        Ok(receiver)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.commands.send(Command::Close);
    }
}

struct SessionTask {
    config: TransportConfig,
    http: reqwest::Client,
    events: mpsc::UnboundedSender<TransportEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Weak so that dropping the session handle ends the task.
    acks: mpsc::WeakUnboundedSender<Command>,
    connected: Arc<AtomicBool>,
    next_ack_id: u64,
    /// Outbound requests waiting for their acknowledgement.
    replies: HashMap<u64, oneshot::Sender<Value>>,
}

impl SessionTask {
    fn lifecycle(&self, kind: LifecycleEvent, detail: Value) {
        let _ = self.events.send(TransportEvent::lifecycle(kind, detail));
    }

    async fn run(mut self) {
        let timeout = self.config.connect_timeout;
        let opening = tokio::time::timeout(timeout, establish(&self.config, &self.http));

        let mut link = tokio::select! {
            result = opening => match result {
                Ok(Ok(link)) => link,
                Ok(Err(e)) => {
                    warn!("connect failed: {e}");
                    self.lifecycle(LifecycleEvent::ConnectError, json!(e.to_string()));
                    return;
                }
                Err(_) => {
                    warn!("connect timed out after {} ms", timeout.as_millis());
                    self.lifecycle(LifecycleEvent::ConnectTimeout, json!(timeout.as_millis() as u64));
                    return;
                }
            },
            _ = self.commands.recv() => {
                debug!("session closed while connecting");
                return;
            }
        };

        info!("socket connected over {}", link.kind.as_str());
        self.connected.store(true, Ordering::SeqCst);
        self.lifecycle(LifecycleEvent::Connect, Value::Null);

        let reason = self.drive(&mut link).await;

        self.connected.store(false, Ordering::SeqCst);
        self.commands.close();
        let mut unsent = 0;
        while let Ok(command) = self.commands.try_recv() {
            if matches!(command, Command::Emit { .. } | Command::Request { .. }) {
                unsent += 1;
            }
        }
        if unsent > 0 {
            warn!("{unsent} queued event(s) were not sent");
        }
        // Pending replies resolve as closed.
        self.replies.clear();

        info!("socket disconnected: {reason}");
        self.lifecycle(LifecycleEvent::Disconnect, json!(reason));
    }

    /// Pump packets until the connection ends; returns the reason.
    async fn drive(&mut self, link: &mut EngineLink) -> &'static str {
        let window = link.open.liveness_window();
        let deadline = sleep(window);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                packet = link.recv() => match packet {
                    None => return "transport close",
                    Some(Err(e)) => {
                        warn!("transport error: {e}");
                        self.lifecycle(LifecycleEvent::Error, json!(e.to_string()));
                        if matches!(e, CgError::Transport(_)) {
                            return "transport error";
                        }
                    }
                    Some(Ok(packet)) => {
                        if let Some(reason) = self.on_packet(link, packet, deadline.as_mut(), window) {
                            return reason;
                        }
                    }
                },
                command = self.commands.recv() => {
                    let sent = match command {
                        Some(Command::Emit { event, payload }) => {
                            debug!("emit {event}");
                            send_socket(link, SocketPacket::event(&event, payload))
                        }
                        Some(Command::Request { event, payload, reply }) => {
                            let id = self.next_ack_id;
                            self.next_ack_id += 1;
                            debug!("request {event} (ack {id})");
                            self.replies.insert(id, reply);
                            send_socket(link, SocketPacket::request(&event, payload, id))
                        }
                        Some(Command::Ack { id, payload }) => {
                            debug!("ack {id}");
                            send_socket(link, SocketPacket::ack(id, payload))
                        }
                        Some(Command::Close) | None => {
                            let _ = send_socket(link, SocketPacket::disconnect());
                            let _ = link.send(EnginePacket::Close);
                            return "io client disconnect";
                        }
                    };
                    if let Err(e) = sent {
                        warn!("failed to send socket packet: {e}");
                        self.connected.store(false, Ordering::SeqCst);
                        self.lifecycle(LifecycleEvent::Error, json!(e.to_string()));
                        return "transport error";
                    }
                }
                _ = &mut deadline => return "ping timeout",
            }
        }
    }

    fn on_packet(
        &mut self,
        link: &EngineLink,
        packet: EnginePacket,
        deadline: std::pin::Pin<&mut tokio::time::Sleep>,
        window: Duration,
    ) -> Option<&'static str> {
        match packet {
            EnginePacket::Ping(data) => {
                deadline.reset(Instant::now() + window);
                let _ = link.send(EnginePacket::Pong(data));
                self.lifecycle(LifecycleEvent::Ping, Value::Null);
                self.lifecycle(LifecycleEvent::Pong, Value::Null);
                None
            }
            EnginePacket::Close => Some("transport close"),
            EnginePacket::Message(text) => match SocketPacket::decode(&text) {
                Ok(SocketPacket::Disconnect { .. }) => Some("io server disconnect"),
                Ok(SocketPacket::ConnectError { data, .. }) => {
                    self.lifecycle(LifecycleEvent::Error, data);
                    Some("io server disconnect")
                }
                Ok(event @ SocketPacket::Event { .. }) => {
                    self.on_event(event);
                    None
                }
                Ok(ack @ SocketPacket::Ack { .. }) => {
                    self.on_ack(ack);
                    None
                }
                Ok(other) => {
                    debug!("ignoring socket packet {other:?}");
                    None
                }
                Err(e) => {
                    warn!("dropping undecodable packet: {e}");
                    self.lifecycle(LifecycleEvent::Error, json!(e.to_string()));
                    None
                }
            },
            _ => None,
        }
    }

    fn on_event(&self, packet: SocketPacket) {
        let Some((name, payload, id)) = packet.into_event_parts() else {
            warn!("dropping event without a name");
            return;
        };
        debug!("received {name}");

        let ack = id.map(|id| {
            let acks = self.acks.clone();
            Ack::new(move |payload| {
                if let Some(commands) = acks.upgrade() {
                    let _ = commands.send(Command::Ack { id, payload });
                }
            })
        });

        let _ = self.events.send(TransportEvent::Message { name, payload, ack });
    }

    fn on_ack(&mut self, packet: SocketPacket) {
        let Some((id, reply)) = packet.into_ack_parts() else {
            return;
        };
        match self.replies.remove(&id) {
            Some(waiter) => {
                debug!("reply for ack {id}");
                let _ = waiter.send(reply);
            }
            None => debug!("ignoring ack {id} nobody is waiting for"),
        }
    }
}

fn send_socket(link: &EngineLink, packet: SocketPacket) -> CgResult<()> {
    link.send(EnginePacket::Message(packet.encode()))
}

/// Open the Engine.IO link and join the default namespace.
async fn establish(config: &TransportConfig, http: &reqwest::Client) -> CgResult<EngineLink> {
    let mut link = link::open_first(config, http).await?;
    link.send(EnginePacket::Message(SocketPacket::connect().encode()))?;

    loop {
        let packet = match link.recv().await {
            Some(packet) => packet?,
            None => return Err(CgError::Connection("closed while joining namespace".into())),
        };

        match packet {
            EnginePacket::Ping(data) => link.send(EnginePacket::Pong(data))?,
            EnginePacket::Message(text) => match SocketPacket::decode(&text)? {
                SocketPacket::Connect { .. } => return Ok(link),
                SocketPacket::ConnectError { data, .. } => {
                    let message = data
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| data.to_string());
                    return Err(CgError::Connection(message));
                }
                other => debug!("ignoring {other:?} before namespace join"),
            },
            EnginePacket::Close => return Err(CgError::Connection("closed while joining namespace".into())),
            _ => {}
        }
    }
}
