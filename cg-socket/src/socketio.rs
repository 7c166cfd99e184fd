//! Socket.IO v4 packet codec (text packets only).
//!
//! Format: `<type>[<namespace>,][<ack id>][<json>]`. Packets carried inside
//! Engine.IO message packets.

use serde_json::Value;

use cg_core::error::{CgError, CgResult};

pub const DEFAULT_NAMESPACE: &str = "/";

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect { namespace: String, data: Option<Value> },
    Disconnect { namespace: String },
    Event { namespace: String, id: Option<u64>, data: Value },
    Ack { namespace: String, id: u64, data: Value },
    ConnectError { namespace: String, data: Value },
}

impl SocketPacket {
    /// Connect request for the default namespace.
    pub fn connect() -> Self {
        Self::Connect {
            namespace: DEFAULT_NAMESPACE.into(),
            data: None,
        }
    }

    pub fn disconnect() -> Self {
        Self::Disconnect {
            namespace: DEFAULT_NAMESPACE.into(),
        }
    }

    /// Named event with a single argument.
    pub fn event(name: &str, payload: Value) -> Self {
        Self::Event {
            namespace: DEFAULT_NAMESPACE.into(),
            id: None,
            data: Value::Array(vec![Value::String(name.to_string()), payload]),
        }
    }

    /// Acknowledgement with a single argument.
    pub fn ack(id: u64, payload: Value) -> Self {
        Self::Ack {
            namespace: DEFAULT_NAMESPACE.into(),
            id,
            data: Value::Array(vec![payload]),
        }
    }

    /// Named event expecting an acknowledgement under `id`. A null payload
    /// sends the name alone.
    pub fn request(name: &str, payload: Value, id: u64) -> Self {
        let mut args = vec![Value::String(name.to_string())];
        if !payload.is_null() {
            args.push(payload);
        }
        Self::Event {
            namespace: DEFAULT_NAMESPACE.into(),
            id: Some(id),
            data: Value::Array(args),
        }
    }

    /// Split an acknowledgement into its id and first argument.
    pub fn into_ack_parts(self) -> Option<(u64, Value)> {
        let Self::Ack { id, data, .. } = self else {
            return None;
        };
        let reply = match data {
            Value::Array(mut args) if !args.is_empty() => args.swap_remove(0),
            Value::Array(_) => Value::Null,
            other => other,
        };
        Some((id, reply))
    }

    /// Split an event into its name and first argument.
    pub fn into_event_parts(self) -> Option<(String, Value, Option<u64>)> {
        let Self::Event { id, data, .. } = self else {
            return None;
        };
        let Value::Array(mut args) = data else {
            return None;
        };
        if args.is_empty() {
            return None;
        }
        let name = match args.remove(0) {
            Value::String(name) => name,
            _ => return None,
        };
        let payload = if args.is_empty() { Value::Null } else { args.swap_remove(0) };
        Some((name, payload, id))
    }

    pub fn encode(&self) -> String {
        let (kind, namespace, id, data) = match self {
            Self::Connect { namespace, data } => ('0', namespace, None, data.as_ref()),
            Self::Disconnect { namespace } => ('1', namespace, None, None),
            Self::Event { namespace, id, data } => ('2', namespace, *id, Some(data)),
            Self::Ack { namespace, id, data } => ('3', namespace, Some(*id), Some(data)),
            Self::ConnectError { namespace, data } => ('4', namespace, None, Some(data)),
        };

        let mut out = String::new();
        out.push(kind);
        if namespace != DEFAULT_NAMESPACE {
            out.push_str(namespace);
            out.push(',');
        }
        if let Some(id) = id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = data {
            out.push_str(&data.to_string());
        }
        out
    }

    pub fn decode(raw: &str) -> CgResult<Self> {
        let mut chars = raw.chars();
        let kind = chars
            .next()
            .ok_or_else(|| CgError::Protocol("empty socket packet".into()))?;
        let mut rest = chars.as_str();

        if kind == '5' || kind == '6' {
            return Err(CgError::Protocol("binary attachments are not supported".into()));
        }

        let namespace = if rest.starts_with('/') {
            match rest.find(',') {
                Some(end) => {
                    let namespace = &rest[..end];
                    rest = &rest[end + 1..];
                    namespace
                }
                None => std::mem::take(&mut rest),
            }
        } else {
            DEFAULT_NAMESPACE
        }
        .to_string();

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 {
            let id = rest[..digits]
                .parse::<u64>()
                .map_err(|e| CgError::Protocol(format!("invalid ack id: {e}")))?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let data = if rest.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str::<Value>(rest)
                    .map_err(|e| CgError::Protocol(format!("invalid packet data: {e}")))?,
            )
        };

        match kind {
            '0' => Ok(Self::Connect { namespace, data }),
            '1' => Ok(Self::Disconnect { namespace }),
            '2' => match data {
                Some(data @ Value::Array(_)) => Ok(Self::Event { namespace, id, data }),
                _ => Err(CgError::Protocol("event without argument list".into())),
            },
            '3' => {
                let id = id.ok_or_else(|| CgError::Protocol("ack without id".into()))?;
                Ok(Self::Ack {
                    namespace,
                    id,
                    data: data.unwrap_or_else(|| Value::Array(Vec::new())),
                })
            }
            '4' => Ok(Self::ConnectError {
                namespace,
                data: data.unwrap_or(Value::Null),
            }),
            other => Err(CgError::Protocol(format!("unknown socket packet type '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode() {
        assert_eq!(SocketPacket::connect().encode(), "0");
        assert_eq!(SocketPacket::disconnect().encode(), "1");
        assert_eq!(
            SocketPacket::event("processInput", json!({"text": "hi"})).encode(),
            r#"2["processInput",{"text":"hi"}]"#
        );
        assert_eq!(SocketPacket::ack(7, json!({"ok": 1})).encode(), r#"37[{"ok":1}]"#);

        let namespaced = SocketPacket::Disconnect { namespace: "/admin".into() };
        assert_eq!(namespaced.encode(), "1/admin,");
    }

    #[test]
    fn test_decode_connect() {
        assert_eq!(
            SocketPacket::decode(r#"0{"sid":"abc"}"#).unwrap(),
            SocketPacket::Connect {
                namespace: "/".into(),
                data: Some(json!({"sid": "abc"})),
            }
        );
        assert_eq!(
            SocketPacket::decode("0/admin,").unwrap(),
            SocketPacket::Connect {
                namespace: "/admin".into(),
                data: None,
            }
        );
    }

    #[test]
    fn test_decode_event_with_ack_id() {
        let packet = SocketPacket::decode(r#"212["handshake",{"v":1}]"#).unwrap();
        assert_eq!(
            packet.clone().into_event_parts(),
            Some(("handshake".to_string(), json!({"v": 1}), Some(12)))
        );
        assert!(matches!(packet, SocketPacket::Event { id: Some(12), .. }));
    }

    #[test]
    fn test_event_without_payload() {
        let packet = SocketPacket::decode(r#"2["finalPing"]"#).unwrap();
        assert_eq!(packet.into_event_parts(), Some(("finalPing".to_string(), Value::Null, None)));
    }

    #[test]
    fn test_decode_ack_and_errors() {
        assert_eq!(
            SocketPacket::decode(r#"35["ok"]"#).unwrap(),
            SocketPacket::Ack {
                namespace: "/".into(),
                id: 5,
                data: json!(["ok"]),
            }
        );
        assert_eq!(
            SocketPacket::decode(r#"4{"message":"Not authorized"}"#).unwrap(),
            SocketPacket::ConnectError {
                namespace: "/".into(),
                data: json!({"message": "Not authorized"}),
            }
        );
    }

    #[test]
    fn test_request_carries_ack_id() {
        assert_eq!(SocketPacket::request("resetState", Value::Null, 3).encode(), r#"23["resetState"]"#);
        assert_eq!(
            SocketPacket::request("resetFlow", json!({"id": "f"}), 4).encode(),
            r#"24["resetFlow",{"id":"f"}]"#
        );
    }

    #[test]
    fn test_ack_parts() {
        let ack = SocketPacket::decode(r#"33[{"user":"u1"},"extra"]"#).unwrap();
        assert_eq!(ack.into_ack_parts(), Some((3, json!({"user": "u1"}))));

        let empty = SocketPacket::decode("38[]").unwrap();
        assert_eq!(empty.into_ack_parts(), Some((8, Value::Null)));

        assert_eq!(SocketPacket::connect().into_ack_parts(), None);
    }

    #[test]
    fn test_decode_rejects_binary_and_malformed() {
        assert!(matches!(SocketPacket::decode(r#"51-["x",{"_placeholder":true,"num":0}]"#), Err(CgError::Protocol(_))));
        assert!(matches!(SocketPacket::decode("2"), Err(CgError::Protocol(_))));
        assert!(matches!(SocketPacket::decode("3[]"), Err(CgError::Protocol(_))));
        assert!(matches!(SocketPacket::decode("2[not json"), Err(CgError::Protocol(_))));
        assert!(matches!(SocketPacket::decode(""), Err(CgError::Protocol(_))));
    }
}
