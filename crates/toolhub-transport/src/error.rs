//! HTTP error responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use toolhub_core::{ErrorKind, RoutingError, ToolFailure};
use toolhub_tools::ManifestError;

/// Error returned by a route handler.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Reload(#[from] ManifestError),

    #[error("authorization flow failed: {0}")]
    AuthFlow(ToolFailure),
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

/// HTTP status for a routing error kind.
#[must_use]
pub const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::AuthenticationError => StatusCode::UNAUTHORIZED,
        ErrorKind::CapacityError => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::UnknownSession | ErrorKind::UnknownTool => StatusCode::NOT_FOUND,
        ErrorKind::MalformedRequest => StatusCode::BAD_REQUEST,
        ErrorKind::InvalidArguments => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::ToolExecutionError => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::ToolTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::TransportError => StatusCode::BAD_GATEWAY,
    }
}

impl ApiError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Routing(err) => status_for(err.kind()),
            Self::Reload(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::AuthFlow(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Stable tag carried in the body's `kind` field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Routing(err) => err.kind().as_str(),
            Self::Reload(_) => "manifest_error",
            Self::AuthFlow(_) => "auth_flow_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "request failed");
        } else {
            tracing::debug!(kind = self.kind(), error = %self, "request rejected");
        }
        let body = ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
