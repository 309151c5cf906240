//! Core traits for tool handlers, authorization flows and authentication.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::{CallerContext, RoutingError, ToolSchema};

/// Session identifier.
pub type SessionId = Uuid;

/// Failure raised by a tool handler.
///
/// The dispatcher converts it into a `tool_execution_error` response.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ToolFailure {
    message: String,
}

impl ToolFailure {
    /// Create a failure with a human-readable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Wrap any error, keeping its display text.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::new(err.to_string())
    }

    /// The failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Trait for named tool implementations.
///
/// Handlers hold the connectors they need (composition) and receive only the
/// caller context of the request being served, never the session.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Default description for the caller-facing catalog.
    fn description(&self) -> &str;

    /// Declared input shape.
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with validated arguments.
    async fn call(
        &self,
        args: Map<String, Value>,
        ctx: &CallerContext,
    ) -> Result<Value, ToolFailure>;
}

/// Outcome of an authorization-flow step.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthReply {
    /// Send the user agent elsewhere.
    Redirect(String),
    /// Respond with a JSON body.
    Json(Value),
}

/// Auxiliary authorization flow exposed by some tools.
///
/// Routed separately from tool dispatch: the transport mounts one authorize
/// and one callback route per tool that reports a flow.
#[async_trait]
pub trait AuthFlow: Send + Sync {
    /// Begin the flow.
    async fn authorize(&self, query: &HashMap<String, String>) -> Result<AuthReply, ToolFailure>;

    /// Complete the flow from the provider's redirect.
    async fn callback(&self, query: &HashMap<String, String>) -> Result<AuthReply, ToolFailure>;
}

/// Identity established by an [`Authenticator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Label of the matching credential.
    pub label: String,
}

impl Principal {
    /// Create a principal.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

/// Validates the API key presented with a request.
pub trait Authenticator: Send + Sync {
    /// Check the key.
    ///
    /// # Errors
    /// Returns [`RoutingError::Authentication`] when the key is missing or unknown.
    fn authenticate(&self, api_key: Option<&str>) -> Result<Principal, RoutingError>;
}
