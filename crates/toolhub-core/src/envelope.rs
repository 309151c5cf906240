//! Request envelope decoding.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{RoutingError, traits::SessionId};

/// Correlation id chosen by the client to match a response to its request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrelationId {
    /// Numeric id.
    Number(i64),
    /// String id.
    Text(String),
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for CorrelationId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    name: String,
    #[serde(default, alias = "args")]
    arguments: Option<Value>,
    #[serde(default)]
    meta: Option<Map<String, Value>>,
}

/// One decoded tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    /// Correlation id echoed on the response.
    pub id: Option<CorrelationId>,
    /// Invocation name.
    pub name: String,
    /// Arguments keyed by parameter name.
    pub arguments: Map<String, Value>,
    /// Per-request caller-context overrides.
    pub meta: Map<String, Value>,
    /// Session the request arrived on.
    pub session_id: SessionId,
}

/// A payload that could not be decoded into an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailure {
    /// Correlation id, when one could be recovered from the payload.
    pub id: Option<CorrelationId>,
    /// Always [`RoutingError::MalformedRequest`].
    pub error: RoutingError,
}

impl DecodeFailure {
    fn new(id: Option<CorrelationId>, reason: impl Into<String>) -> Self {
        Self {
            id,
            error: RoutingError::MalformedRequest(reason.into()),
        }
    }
}

impl RequestEnvelope {
    /// Build an envelope directly.
    #[must_use]
    pub fn new(session_id: SessionId, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
            meta: Map::new(),
            session_id,
        }
    }

    /// Attach a correlation id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<CorrelationId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Decode a JSON payload.
    ///
    /// Accepts `{"id"?, "name", "arguments"|"args"?, "meta"?}`; unknown keys
    /// (such as a frame `type` tag) are ignored.
    ///
    /// # Errors
    /// Returns a [`DecodeFailure`] carrying any recoverable correlation id.
    pub fn decode(raw: &[u8], session_id: SessionId) -> Result<Self, DecodeFailure> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| DecodeFailure::new(None, format!("invalid JSON: {e}")))?;

        let Value::Object(object) = value else {
            return Err(DecodeFailure::new(None, "request must be a JSON object"));
        };

        let id = match object.get("id") {
            None | Some(Value::Null) => None,
            Some(raw_id) => match serde_json::from_value::<CorrelationId>(raw_id.clone()) {
                Ok(id) => Some(id),
                Err(_) => {
                    return Err(DecodeFailure::new(
                        None,
                        "'id' must be a string or an integer",
                    ));
                }
            },
        };

        let raw: RawEnvelope = serde_json::from_value(Value::Object(object))
            .map_err(|e| DecodeFailure::new(id.clone(), e.to_string()))?;

        if raw.name.trim().is_empty() {
            return Err(DecodeFailure::new(id, "'name' must not be empty"));
        }

        let arguments = match raw.arguments {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(DecodeFailure::new(id, "'arguments' must be an object")),
        };

        Ok(Self {
            id,
            name: raw.name,
            arguments,
            meta: raw.meta.unwrap_or_default(),
            session_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn test_decode_accepts_args_alias() {
        let sid = Uuid::new_v4();
        let env = RequestEnvelope::decode(br#"{"name":"add","args":{"a":2,"b":3}}"#, sid).unwrap();
        assert_eq!(env.name, "add");
        assert_eq!(env.arguments.get("a"), Some(&json!(2)));
        assert_eq!(env.session_id, sid);
        assert!(env.id.is_none());
    }

    #[test]
    fn test_decode_ignores_frame_type_and_keeps_meta() {
        let raw = br#"{"type":"call","id":"r-1","name":"echo","arguments":{"text":"hi"},"meta":{"tenant_id":"t"}}"#;
        let env = RequestEnvelope::decode(raw, Uuid::new_v4()).unwrap();
        assert_eq!(env.id, Some(CorrelationId::Text("r-1".into())));
        assert_eq!(env.meta.get("tenant_id"), Some(&json!("t")));
    }

    #[test]
    fn test_decode_failure_salvages_id() {
        let failure = RequestEnvelope::decode(br#"{"id":7,"arguments":{}}"#, Uuid::new_v4())
            .unwrap_err();
        assert_eq!(failure.id, Some(CorrelationId::Number(7)));
        assert!(matches!(failure.error, RoutingError::MalformedRequest(_)));
    }

    #[test]
    fn test_decode_rejects_non_object_arguments() {
        let failure =
            RequestEnvelope::decode(br#"{"id":"x","name":"add","arguments":[1,2]}"#, Uuid::new_v4())
                .unwrap_err();
        assert_eq!(failure.id, Some(CorrelationId::Text("x".into())));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let failure = RequestEnvelope::decode(b"not json", Uuid::new_v4()).unwrap_err();
        assert!(failure.id.is_none());
        assert!(failure.error.to_string().contains("invalid JSON"));
    }
}
