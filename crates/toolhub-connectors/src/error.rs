//! Connector errors.

use std::time::Duration;

use thiserror::Error;
use toolhub_core::ToolFailure;

/// Error raised by a connector call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
    #[error("transport error: {0}")]
    Transport(String),
}

impl ConnectorError {
    /// Whether a retry may succeed.
    #[must_use]
    pub const fn is_throttle(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

impl From<std::io::Error> for ConnectorError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<ConnectorError> for ToolFailure {
    fn from(err: ConnectorError) -> Self {
        Self::new(err.to_string())
    }
}
