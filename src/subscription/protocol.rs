//! graphql-transport-ws Wire Protocol
//!
//! Single responsibility: Encode outbound frames and decode inbound frames.
//!
//! # Wire Format
//!
//! Every frame is one JSON text message discriminated by `type`.
//!
//! ## Outbound
//! ```text
//! { "type": "connection_init", "payload": { ...auth/version/locale fields... } }
//! { "id": <token>, "type": "subscribe",
//!   "payload": { "operationName": str, "query": str, "variables": object } }
//! { "id": <token>, "type": "complete" }
//! { "type": "ping", "payload": {} }
//! { "type": "pong", "payload": {} }
//! ```
//!
//! ## Inbound
//! ```text
//! { "type": "connection_ack" }
//! { "id": <token>, "type": "next",     "payload": { "data": ... } }
//! { "id": <token>, "type": "error",    "payload": [ ...graphql errors... ] }
//! { "id": <token>, "type": "complete" }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RealtimeError;

/// The sub-protocol advertised in `Sec-WebSocket-Protocol`.
pub const SUBPROTOCOL: &str = "graphql-transport-ws";

/// Payload of a `subscribe` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePayload {
    pub operation_name: String,
    pub query: String,
    pub variables: Value,
}

/// A frame sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    ConnectionInit {
        payload: Map<String, Value>,
    },
    Subscribe {
        id: String,
        payload: SubscribePayload,
    },
    Complete {
        id: String,
    },
    Ping {
        payload: Map<String, Value>,
    },
    Pong {
        payload: Map<String, Value>,
    },
}

impl OutboundFrame {
    pub fn subscribe(id: impl Into<String>, operation_name: &str, query: &str, variables: Value) -> Self {
        // Servers expect an object even when an operation takes no variables
        let variables = match variables {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        Self::Subscribe {
            id: id.into(),
            payload: SubscribePayload {
                operation_name: operation_name.to_string(),
                query: query.to_string(),
                variables,
            },
        }
    }

    pub fn ping() -> Self {
        Self::Ping { payload: Map::new() }
    }

    pub fn pong() -> Self {
        Self::Pong { payload: Map::new() }
    }

    /// Serialize to the text of a single WebSocket frame.
    pub fn encode(&self) -> Result<String, RealtimeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// The `type` of an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    ConnectionAck,
    Next,
    Error,
    Complete,
    Ping,
    Pong,
    /// Any other `type`, or a frame without one
    Unknown(String),
}

impl From<&str> for MessageKind {
    fn from(kind: &str) -> Self {
        match kind {
            "connection_ack" => Self::ConnectionAck,
            "next" => Self::Next,
            "error" => Self::Error,
            "complete" => Self::Complete,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ConnectionAck => "connection_ack",
            Self::Next => "next",
            Self::Error => "error",
            Self::Complete => "complete",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Unknown(kind) => kind,
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub kind: MessageKind,
    /// Subscription token, present on `next`/`error`/`complete`
    pub id: Option<String>,
    pub payload: Option<Value>,
}

/// Raw shape used only for decoding.
#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

impl InboundMessage {
    /// Decode one text frame. Anything that is not a JSON object is an error.
    pub fn decode(text: &str) -> Result<Self, RealtimeError> {
        let raw: RawFrame = serde_json::from_str(text)?;
        Ok(Self {
            kind: raw.kind.as_deref().unwrap_or("unknown").into(),
            id: raw.id,
            payload: raw.payload,
        })
    }

    /// The `payload.data` object of a `next` message.
    pub fn data(&self) -> Option<&Value> {
        self.payload.as_ref().and_then(|p| p.get("data"))
    }

    /// Re-encode as the JSON value the server sent.
    pub fn to_json(&self) -> Value {
        let mut frame = Map::new();
        frame.insert("type".into(), Value::String(self.kind.as_str().to_string()));
        if let Some(id) = &self.id {
            frame.insert("id".into(), Value::String(id.clone()));
        }
        if let Some(payload) = &self.payload {
            frame.insert("payload".into(), payload.clone());
        }
        Value::Object(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_frame_shape() {
        let frame = OutboundFrame::subscribe("sub-1", "ActivityFeedUpdate", "subscription { x }", Value::Null);
        let encoded: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(
            encoded,
            json!({
                "id": "sub-1",
                "type": "subscribe",
                "payload": {
                    "operationName": "ActivityFeedUpdate",
                    "query": "subscription { x }",
                    "variables": {}
                }
            })
        );
    }

    #[test]
    fn test_control_frame_shapes() {
        let ping: Value = serde_json::from_str(&OutboundFrame::ping().encode().unwrap()).unwrap();
        assert_eq!(ping, json!({"type": "ping", "payload": {}}));

        let complete = OutboundFrame::Complete { id: "sub-1".into() };
        let complete: Value = serde_json::from_str(&complete.encode().unwrap()).unwrap();
        assert_eq!(complete, json!({"id": "sub-1", "type": "complete"}));

        let mut payload = Map::new();
        payload.insert("Authorization".into(), json!("Bearer t"));
        let init = OutboundFrame::ConnectionInit { payload };
        let init: Value = serde_json::from_str(&init.encode().unwrap()).unwrap();
        assert_eq!(init, json!({"type": "connection_init", "payload": {"Authorization": "Bearer t"}}));
    }

    #[test]
    fn test_decode_kinds() {
        let ack = InboundMessage::decode(r#"{"type":"connection_ack"}"#).unwrap();
        assert_eq!(ack.kind, MessageKind::ConnectionAck);
        assert!(ack.id.is_none());

        let next = InboundMessage::decode(r#"{"id":"a","type":"next","payload":{"data":{"x":1}}}"#).unwrap();
        assert_eq!(next.kind, MessageKind::Next);
        assert_eq!(next.id.as_deref(), Some("a"));
        assert_eq!(next.data(), Some(&json!({"x": 1})));

        let other = InboundMessage::decode(r#"{"type":"ka"}"#).unwrap();
        assert_eq!(other.kind, MessageKind::Unknown("ka".into()));

        let untyped = InboundMessage::decode(r#"{"id":"a"}"#).unwrap();
        assert_eq!(untyped.kind, MessageKind::Unknown("unknown".into()));
    }

    #[test]
    fn test_decode_rejects_noise() {
        assert!(InboundMessage::decode("not json").is_err());
        assert!(InboundMessage::decode("[1,2,3]").is_err());
        assert!(InboundMessage::decode(r#"{"type":5}"#).is_err());
    }

    #[test]
    fn test_to_json_keeps_wire_fields() {
        let text = r#"{"id":"a","type":"error","payload":[{"message":"boom"}]}"#;
        let message = InboundMessage::decode(text).unwrap();
        assert_eq!(message.to_json(), serde_json::from_str::<Value>(text).unwrap());
    }
}
