//! Outbound message model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CorrelationId, ErrorKind, RoutingError, traits::SessionId};

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Session established.
    SessionOpened { session_id: SessionId },
    /// Successful tool result.
    Result {
        id: Option<CorrelationId>,
        tool: String,
        content: Value,
    },
    /// Failed request.
    Error {
        id: Option<CorrelationId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool: Option<String>,
        kind: ErrorKind,
        message: String,
    },
    /// Server-initiated event.
    Event { topic: String, payload: Value },
    /// Keepalive.
    Heartbeat { at: i64 },
    /// Pong response.
    Pong,
}

impl ServerMessage {
    /// Build an error response from a routing error.
    #[must_use]
    pub fn error(id: Option<CorrelationId>, tool: Option<String>, err: &RoutingError) -> Self {
        Self::Error {
            id,
            tool,
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Whether the message belongs in the replay history.
    #[must_use]
    pub const fn is_replayable(&self) -> bool {
        !matches!(self, Self::Heartbeat { .. } | Self::Pong)
    }

    /// Correlation id of a response, if any.
    #[must_use]
    pub const fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            Self::Result { id, .. } | Self::Error { id, .. } => id.as_ref(),
            _ => None,
        }
    }

    /// Wire tag, used as the SSE event name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::SessionOpened { .. } => "session_opened",
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
            Self::Event { .. } => "event",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Pong => "pong",
        }
    }
}

/// A message as delivered to a transport, tagged with its replay id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    /// Position in the session's event log; `None` for unlogged messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<u64>,
    #[serde(flatten)]
    pub message: ServerMessage,
}

impl Outbound {
    /// Wrap a message that is not part of the replay history.
    #[must_use]
    pub const fn unlogged(message: ServerMessage) -> Self {
        Self {
            event_id: None,
            message,
        }
    }

    /// Approximate encoded size, used to bound history.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        serde_json::to_vec(self).map_or(0, |v| v.len())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_result_serialization() {
        let out = Outbound {
            event_id: Some(3),
            message: ServerMessage::Result {
                id: Some(CorrelationId::Number(1)),
                tool: "add".into(),
                content: json!(5),
            },
        };
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(
            value,
            json!({"event_id": 3, "type": "result", "id": 1, "tool": "add", "content": 5})
        );

        let parsed: Outbound = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, out);
    }

    #[test]
    fn test_error_carries_kind_tag() {
        let err = RoutingError::UnknownTool("nonexistent".into());
        let msg = ServerMessage::error(None, Some("nonexistent".into()), &err);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["kind"], "unknown_tool");
        assert_eq!(value["id"], Value::Null);
    }

    #[test]
    fn test_heartbeats_are_not_replayable() {
        assert!(!ServerMessage::Heartbeat { at: 0 }.is_replayable());
        assert!(ServerMessage::Event { topic: "t".into(), payload: json!({}) }.is_replayable());
    }
}
