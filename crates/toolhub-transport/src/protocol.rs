//! Wire protocol for client-server communication.
//!
//! Client frames are JSON objects tagged by `type`:
//! `{"type":"call","id":..,"name":..,"arguments":{..},"meta":{..}}` or
//! `{"type":"ping"}`. A frame without `type` is treated as a call. Server
//! frames are [`Outbound`] messages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use toolhub_core::{CorrelationId, Outbound};

/// How an inbound frame should be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// A tool invocation; the raw frame goes to the dispatcher.
    Call,
    /// Keepalive probe.
    Ping,
    /// A `type` the server does not know.
    Unknown(String),
}

#[derive(Deserialize)]
struct Tag {
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

impl FrameKind {
    /// Classify a frame by its `type` field.
    ///
    /// Frames that are not JSON objects are classified as calls, so the
    /// dispatcher reports them as `malformed_request`.
    #[must_use]
    pub fn classify(frame: &[u8]) -> Self {
        let Ok(tag) = serde_json::from_slice::<Tag>(frame) else {
            return Self::Call;
        };
        match tag.kind.as_deref() {
            None | Some("call") => Self::Call,
            Some("ping") => Self::Ping,
            Some(other) => Self::Unknown(other.to_owned()),
        }
    }
}

/// A call frame as a client sends it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "call")]
pub struct CallFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<CorrelationId>,
    pub name: String,
    pub arguments: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl CallFrame {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
            meta: Map::new(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<CorrelationId>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}

/// Encode an outbound message as a text frame.
///
/// # Errors
/// Returns the serializer error; `Outbound` only fails on non-string map keys.
pub fn encode(outbound: &Outbound) -> Result<String, serde_json::Error> {
    serde_json::to_string(outbound)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use toolhub_core::{RequestEnvelope, ServerMessage};
    use uuid::Uuid;

    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(FrameKind::classify(br#"{"type":"ping"}"#), FrameKind::Ping);
        assert_eq!(FrameKind::classify(br#"{"type":"call","name":"add"}"#), FrameKind::Call);
        assert_eq!(FrameKind::classify(br#"{"name":"add"}"#), FrameKind::Call);
        assert_eq!(FrameKind::classify(b"not json"), FrameKind::Call);
        assert_eq!(
            FrameKind::classify(br#"{"type":"resize"}"#),
            FrameKind::Unknown("resize".into())
        );
    }

    #[test]
    fn test_call_frame_decodes_as_envelope() {
        let frame = CallFrame::new("add", json!({"a": 2, "b": 3}).as_object().unwrap().clone())
            .with_id(7_i64)
            .with_meta("tenant_id", json!("acme"));
        let bytes = serde_json::to_vec(&frame).unwrap();
        assert_eq!(FrameKind::classify(&bytes), FrameKind::Call);

        let envelope = RequestEnvelope::decode(&bytes, Uuid::new_v4()).unwrap();
        assert_eq!(envelope.name, "add");
        assert_eq!(envelope.id, Some(CorrelationId::from(7_i64)));
        assert_eq!(envelope.meta["tenant_id"], "acme");
    }

    #[test]
    fn test_encode_carries_event_id() {
        let text = encode(&Outbound {
            event_id: Some(3),
            message: ServerMessage::Pong,
        })
        .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"event_id": 3, "type": "pong"}));
    }
}
