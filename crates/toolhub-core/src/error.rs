//! Routing error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable tag carried by every error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Authentication material was missing or rejected.
    AuthenticationError,
    /// The live-session limit was reached.
    CapacityError,
    /// The session identifier is not live.
    UnknownSession,
    /// The request payload could not be decoded.
    MalformedRequest,
    /// No handler is registered under the requested name.
    UnknownTool,
    /// Arguments did not satisfy the tool's schema.
    InvalidArguments,
    /// The handler failed.
    ToolExecutionError,
    /// The handler exceeded its timeout.
    ToolTimeout,
    /// The transport broke.
    TransportError,
}

impl ErrorKind {
    /// Returns the canonical tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthenticationError => "authentication_error",
            Self::CapacityError => "capacity_error",
            Self::UnknownSession => "unknown_session",
            Self::MalformedRequest => "malformed_request",
            Self::UnknownTool => "unknown_tool",
            Self::InvalidArguments => "invalid_arguments",
            Self::ToolExecutionError => "tool_execution_error",
            Self::ToolTimeout => "tool_timeout",
            Self::TransportError => "transport_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while opening sessions and routing requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("session capacity reached ({limit} live sessions)")]
    Capacity { limit: usize },
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("no such tool: {0}")]
    UnknownTool(String),
    #[error("invalid argument '{field}': {reason}")]
    InvalidArguments { field: String, reason: String },
    #[error("tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },
    #[error("tool '{tool}' timed out after {timeout_ms} ms")]
    ToolTimeout { tool: String, timeout_ms: u64 },
    #[error("transport error: {0}")]
    Transport(String),
}

impl RoutingError {
    /// Stable kind tag for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication(_) => ErrorKind::AuthenticationError,
            Self::Capacity { .. } => ErrorKind::CapacityError,
            Self::UnknownSession(_) => ErrorKind::UnknownSession,
            Self::MalformedRequest(_) => ErrorKind::MalformedRequest,
            Self::UnknownTool(_) => ErrorKind::UnknownTool,
            Self::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            Self::ToolExecution { .. } => ErrorKind::ToolExecutionError,
            Self::ToolTimeout { .. } => ErrorKind::ToolTimeout,
            Self::Transport(_) => ErrorKind::TransportError,
        }
    }

    /// Whether this error ends the session it occurred on.
    ///
    /// Only transport failures do; everything else terminates the one request.
    #[must_use]
    pub const fn is_session_fatal(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Shorthand for an argument validation failure.
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_are_stable() {
        let tag = serde_json::to_string(&ErrorKind::ToolExecutionError).unwrap();
        assert_eq!(tag, "\"tool_execution_error\"");
        assert_eq!(ErrorKind::UnknownTool.as_str(), "unknown_tool");
    }

    #[test]
    fn test_unknown_tool_echoes_name() {
        let err = RoutingError::UnknownTool("nonexistent".to_string());
        assert_eq!(err.kind(), ErrorKind::UnknownTool);
        assert!(err.to_string().contains("nonexistent"));
        assert!(!err.is_session_fatal());
    }

    #[test]
    fn test_only_transport_errors_are_fatal() {
        assert!(RoutingError::Transport("broken pipe".into()).is_session_fatal());
        assert!(!RoutingError::invalid_argument("a", "expected an integer").is_session_fatal());
    }
}
