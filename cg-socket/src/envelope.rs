//! Wire envelopes in both directions.
//!
//! Inbound, the backend multiplexes output, errors and end-of-turn markers
//! over one `output` event as a tagged `{type, data}` envelope. A few side
//! channels (`exception`, `typingStatus`, a dedicated `finalPing`) arrive as
//! their own events. [`route`] turns either shape into a [`ClientEvent`].
//!
//! Outbound, [`input_envelope`] builds the message body according to the
//! session's [`EnvelopeConfig`], and [`handshake_reply`] builds the identity
//! acknowledgement for the in-band handshake.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use cg_core::config::SessionOptions;
use cg_core::constants::{events, INPUT_SOURCE};

use crate::buffer::PendingMessage;
use crate::events::{ClientEvent, FinalPing, FinalPingFraming, Output};

/// Tagged reply envelope carried by the `output` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ReplyEnvelope {
    #[serde(rename = "output")]
    Output(Output),
    #[serde(rename = "error")]
    Error(Value),
    #[serde(rename = "finalPing")]
    FinalPing(Value),
}

impl ReplyEnvelope {
    /// Parse an envelope; unknown tags and malformed bodies yield `None`.
    pub fn parse(raw: &Value) -> Option<Self> {
        if !raw.as_object()?.contains_key("data") {
            return None;
        }
        Self::deserialize(raw).ok()
    }

    pub fn into_event(self) -> ClientEvent {
        match self {
            Self::Output(output) => ClientEvent::Output(output),
            // The error body wraps the actual error under `error`.
            Self::Error(data) => {
                let inner = match data {
                    Value::Object(mut map) => match map.remove("error") {
                        Some(error) => error,
                        None => Value::Object(map),
                    },
                    other => other,
                };
                ClientEvent::Error(inner)
            }
            Self::FinalPing(payload) => ClientEvent::FinalPing(FinalPing {
                framing: FinalPingFraming::Enveloped,
                payload,
            }),
        }
    }
}

/// Demultiplex one `output` envelope.
pub fn demultiplex(raw: &Value) -> Option<ClientEvent> {
    ReplyEnvelope::parse(raw).map(ReplyEnvelope::into_event)
}

/// Route an inbound named event to a client event, if it is one the
/// protocol defines.
pub fn route(name: &str, payload: Value) -> Option<ClientEvent> {
    match name {
        events::OUTPUT => demultiplex(&payload),
        events::EXCEPTION => Some(ClientEvent::Exception(payload)),
        events::TYPING_STATUS => Some(ClientEvent::TypingStatus(payload)),
        events::FINAL_PING => Some(ClientEvent::FinalPing(FinalPing {
            framing: FinalPingFraming::Dedicated,
            payload,
        })),
        _ => None,
    }
}

/// Build the outbound body for one message.
pub fn input_envelope(options: &SessionOptions, url_token: &str, message: &PendingMessage) -> Value {
    let config = &options.envelope;
    let mut body = Map::new();

    if let Some(field) = config.token_field {
        body.insert(field.wire_name().into(), json!(url_token));
    }
    if config.include_identity {
        body.insert("userId".into(), json!(options.user_id));
        body.insert("sessionId".into(), json!(options.session_id));
        body.insert("channel".into(), json!(options.channel));
        body.insert("source".into(), json!(INPUT_SOURCE));
    }
    if config.include_passthrough_ip {
        body.insert("passthroughIP".into(), json!(options.passthrough_ip));
    }
    if config.include_policy_flags {
        let flags = &options.flags;
        body.insert("reloadFlow".into(), json!(flags.reload_flow));
        body.insert("resetFlow".into(), json!(flags.reset_flow));
        body.insert("resetState".into(), json!(flags.reset_state));
        body.insert("resetContext".into(), json!(flags.reset_context));
    }

    body.insert("text".into(), json!(message.text));
    if let Some(data) = &message.data {
        body.insert("data".into(), data.clone());
    }

    Value::Object(body)
}

/// Identity acknowledgement for the backend's `handshake` request.
pub fn handshake_reply(options: &SessionOptions, url_token: &str) -> Value {
    json!({
        "userId": options.user_id,
        "sessionId": options.session_id,
        "urlToken": url_token,
        "testMode": options.test_mode,
    })
}
