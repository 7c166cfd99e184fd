//! Engine.IO connections over websocket or HTTP long-polling.
//!
//! Both drivers reduce to an [`EngineLink`]: a pair of channels carrying
//! decoded Engine.IO packets, fed by background reader and writer tasks.
//! The Socket.IO layer above never sees which wire is underneath. A writer
//! that fails reports a `Transport` error on the inbound channel and stops.
//!
//! A polling session whose server advertises `websocket` upgrades is moved
//! onto a websocket before it is handed out, when websocket is also among
//! the configured transports.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use cg_core::error::{CgError, CgResult};

use crate::engineio::{self, EnginePacket, OpenPayload};
use crate::transport::{TransportConfig, TransportKind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Inbound = mpsc::UnboundedSender<CgResult<EnginePacket>>;

const WEBSOCKET_UPGRADE: &str = "websocket";

/// An open Engine.IO connection.
pub struct EngineLink {
    pub kind: TransportKind,
    pub open: OpenPayload,
    incoming: mpsc::UnboundedReceiver<CgResult<EnginePacket>>,
    outgoing: mpsc::UnboundedSender<EnginePacket>,
    reader: JoinHandle<()>,
}

impl EngineLink {
    /// Queue a packet for sending.
    pub fn send(&self, packet: EnginePacket) -> CgResult<()> {
        self.outgoing
            .send(packet)
            .map_err(|_| CgError::Transport(format!("{} writer closed", self.kind.as_str())))
    }

    /// Next inbound packet. `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<CgResult<EnginePacket>> {
        self.incoming.recv().await
    }
}

impl Drop for EngineLink {
    fn drop(&mut self) {
        // The writer drains what is queued and exits once `outgoing` drops.
        self.reader.abort();
    }
}

/// Open a link with the first transport in `config.transports` that
/// succeeds.
pub async fn open_first(config: &TransportConfig, http: &reqwest::Client) -> CgResult<EngineLink> {
    let mut last_error = CgError::Config("no transports configured".into());

    for (index, kind) in config.transports.iter().enumerate() {
        let url = config.endpoint_url(*kind)?;
        let result = match kind {
            TransportKind::WebSocket => open_websocket(url).await,
            TransportKind::Polling => {
                let upgrade = if config.transports[index + 1..].contains(&TransportKind::WebSocket) {
                    Some(config.endpoint_url(TransportKind::WebSocket)?)
                } else {
                    None
                };
                open_polling(url, upgrade, http).await
            }
        };

        match result {
            Ok(link) => {
                debug!("engine link open over {} (sid={})", link.kind.as_str(), link.open.sid);
                return Ok(link);
            }
            Err(e) => {
                warn!("{} transport failed: {e}", kind.as_str());
                last_error = e;
            }
        }
    }

    Err(last_error)
}

fn connection_error(kind: TransportKind, e: impl std::fmt::Display) -> CgError {
    CgError::Connection(format!("{}: {e}", kind.as_str()))
}

async fn open_websocket(url: Url) -> CgResult<EngineLink> {
    let kind = TransportKind::WebSocket;
    debug!("connecting websocket {url}");
    let (mut ws, _) = connect_async(url.as_str())
        .await
        .map_err(|e| connection_error(kind, e))?;

    let open = loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => match EnginePacket::decode(&text)? {
                EnginePacket::Open(data) => break OpenPayload::parse(&data)?,
                other => {
                    return Err(CgError::Protocol(format!("expected open packet, got {other:?}")));
                }
            },
            Some(Ok(Message::Close(_))) | None => {
                return Err(connection_error(kind, "closed before open packet"));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(connection_error(kind, e)),
        }
    };

    let (in_tx, in_rx) = mpsc::unbounded_channel();
    Ok(websocket_link(ws, open, in_tx, in_rx))
}

/// Spawn reader and writer tasks over an established websocket.
fn websocket_link(
    ws: WsStream,
    open: OpenPayload,
    in_tx: Inbound,
    in_rx: mpsc::UnboundedReceiver<CgResult<EnginePacket>>,
) -> EngineLink {
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<EnginePacket>();
    let failures = in_tx.clone();

    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let packet = match frame {
                Ok(Message::Text(text)) => EnginePacket::decode(&text),
                Ok(Message::Binary(_)) => Err(CgError::Protocol("binary frames are not supported".into())),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    let _ = in_tx.send(Err(CgError::Transport(e.to_string())));
                    break;
                }
            };
            if in_tx.send(packet).is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(packet) = out_rx.recv().await {
            let closing = packet == EnginePacket::Close;
            if let Err(e) = sink.send(Message::Text(packet.encode())).await {
                debug!("websocket write failed: {e}");
                let _ = failures.send(Err(CgError::Transport(format!("websocket write failed: {e}"))));
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    EngineLink {
        kind: TransportKind::WebSocket,
        open,
        incoming: in_rx,
        outgoing: out_tx,
        reader,
    }
}

async fn poll_once(http: &reqwest::Client, url: &Url, window: Duration) -> reqwest::Result<String> {
    http.get(url.clone())
        .timeout(window)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
}

async fn open_polling(url: Url, upgrade: Option<Url>, http: &reqwest::Client) -> CgResult<EngineLink> {
    let kind = TransportKind::Polling;
    debug!("opening polling session {url}");

    let body = http
        .get(url.clone())
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| connection_error(kind, e))?
        .text()
        .await
        .map_err(|e| connection_error(kind, e))?;

    let mut packets = engineio::decode_payload(&body)?.into_iter();
    let open = match packets.next() {
        Some(EnginePacket::Open(data)) => OpenPayload::parse(&data)?,
        other => return Err(CgError::Protocol(format!("expected open packet, got {other:?}"))),
    };

    let mut session_url = url;
    session_url.query_pairs_mut().append_pair("sid", &open.sid);
    let window = open.liveness_window();

    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<EnginePacket>();

    for packet in packets {
        let _ = in_tx.send(Ok(packet));
    }
    let failures = in_tx.clone();
    let handover = in_tx.clone();
    let paused = Arc::new(AtomicBool::new(false));

    let mut reader = {
        let http = http.clone();
        let url = session_url.clone();
        let paused = paused.clone();
        tokio::spawn(async move {
            loop {
                let body = match poll_once(&http, &url, window).await {
                    Ok(body) => body,
                    Err(e) => {
                        if !paused.load(Ordering::SeqCst) {
                            let _ = in_tx.send(Err(CgError::Transport(e.to_string())));
                        }
                        break;
                    }
                };

                let packets = match engineio::decode_payload(&body) {
                    Ok(packets) => packets,
                    Err(e) => {
                        let _ = in_tx.send(Err(e));
                        continue;
                    }
                };

                let mut closed = false;
                for packet in packets {
                    closed |= packet == EnginePacket::Close;
                    if in_tx.send(Ok(packet)).is_err() {
                        return;
                    }
                }
                if closed || paused.load(Ordering::SeqCst) {
                    break;
                }
            }
        })
    };

    let http_writer = http.clone();
    let post_url = session_url.clone();
    tokio::spawn(async move {
        while let Some(first) = out_rx.recv().await {
            let mut batch = vec![first];
            while let Ok(packet) = out_rx.try_recv() {
                batch.push(packet);
            }
            let closing = batch.contains(&EnginePacket::Close);

            let result = http_writer
                .post(post_url.clone())
                .header("Content-Type", "text/plain;charset=UTF-8")
                .body(engineio::encode_payload(&batch))
                .send()
                .await
                .and_then(|r| r.error_for_status());
            if let Err(e) = result {
                debug!("polling write failed: {e}");
                let _ = failures.send(Err(CgError::Transport(format!("polling write failed: {e}"))));
                break;
            }
            if closing {
                break;
            }
        }
    });

    let upgrade = upgrade.filter(|_| open.upgrades.iter().any(|u| u == WEBSOCKET_UPGRADE));
    if let Some(mut ws_url) = upgrade {
        ws_url.query_pairs_mut().append_pair("sid", &open.sid);
        let wait = Duration::from_millis(open.ping_timeout);

        match tokio::time::timeout(wait, confirm_websocket(ws_url)).await {
            Ok(Ok(mut ws)) => {
                // Let the pending poll return (the server answers it with a
                // noop) so nothing it carries is lost.
                paused.store(true, Ordering::SeqCst);
                if tokio::time::timeout(window, &mut reader).await.is_err() {
                    reader.abort();
                }
                drop(out_tx);

                ws.send(Message::Text(EnginePacket::Upgrade.encode()))
                    .await
                    .map_err(|e| connection_error(TransportKind::WebSocket, e))?;
                info!("upgraded polling session {} to websocket", open.sid);
                return Ok(websocket_link(ws, open, handover, in_rx));
            }
            Ok(Err(e)) => warn!("websocket upgrade failed, staying on polling: {e}"),
            Err(_) => warn!("websocket upgrade check timed out, staying on polling"),
        }
    }
    drop(handover);

    Ok(EngineLink {
        kind,
        open,
        incoming: in_rx,
        outgoing: out_tx,
        reader,
    })
}

/// Open a websocket for an existing session and confirm it with the
/// `2probe` / `3probe` exchange.
async fn confirm_websocket(url: Url) -> CgResult<WsStream> {
    let kind = TransportKind::WebSocket;
    debug!("checking websocket upgrade {url}");
    let (mut ws, _) = connect_async(url.as_str())
        .await
        .map_err(|e| connection_error(kind, e))?;

    ws.send(Message::Text(EnginePacket::Ping("probe".into()).encode()))
        .await
        .map_err(|e| connection_error(kind, e))?;

    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return match EnginePacket::decode(&text)? {
                    EnginePacket::Pong(data) if data == "probe" => Ok(ws),
                    other => Err(CgError::Protocol(format!("unexpected upgrade answer {other:?}"))),
                };
            }
            Some(Ok(Message::Close(_))) | None => return Err(connection_error(kind, "closed during upgrade check")),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(connection_error(kind, e)),
        }
    }
}
