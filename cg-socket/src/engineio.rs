//! Engine.IO v4 packet codec.
//!
//! Text packets are a single type digit followed by the payload. Long-polling
//! bodies concatenate packets with the record separator `0x1e`. Binary
//! packets (`b` prefix on polling, binary frames on websocket) are not
//! supported by this client.

use std::time::Duration;

use serde::Deserialize;

use cg_core::error::{CgError, CgResult};

pub const PROTOCOL_VERSION: u8 = 4;

/// Separator between packets in a polling payload.
pub const PAYLOAD_SEPARATOR: char = '\u{1e}';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    Open(String),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn encode(&self) -> String {
        match self {
            Self::Open(data) => format!("0{data}"),
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(data) => format!("4{data}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }

    pub fn decode(raw: &str) -> CgResult<Self> {
        let mut chars = raw.chars();
        let kind = chars
            .next()
            .ok_or_else(|| CgError::Protocol("empty engine packet".into()))?;
        let data = chars.as_str().to_string();

        match kind {
            '0' => Ok(Self::Open(data)),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(data)),
            '3' => Ok(Self::Pong(data)),
            '4' => Ok(Self::Message(data)),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            'b' => Err(CgError::Protocol("binary packets are not supported".into())),
            other => Err(CgError::Protocol(format!("unknown engine packet type '{other}'"))),
        }
    }
}

/// Split a polling body into packets.
pub fn decode_payload(body: &str) -> CgResult<Vec<EnginePacket>> {
    body.split(PAYLOAD_SEPARATOR)
        .filter(|part| !part.is_empty())
        .map(EnginePacket::decode)
        .collect()
}

/// Join packets into a polling body.
pub fn encode_payload(packets: &[EnginePacket]) -> String {
    packets
        .iter()
        .map(EnginePacket::encode)
        .collect::<Vec<_>>()
        .join(&PAYLOAD_SEPARATOR.to_string())
}

/// Body of the server's open packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPayload {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl OpenPayload {
    pub fn parse(data: &str) -> CgResult<Self> {
        serde_json::from_str(data).map_err(|e| CgError::Protocol(format!("invalid open packet: {e}")))
    }

    /// Longest silence tolerated before the server is presumed gone.
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval + self.ping_timeout)
    }
}
