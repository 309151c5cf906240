//! Session telemetry.

use std::{fmt, time::Duration};

use toolhub_core::{ErrorKind, SessionId};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The client closed the transport or asked for it.
    Client,
    /// No activity within the idle timeout.
    Idle,
    /// Delivery to the bound transport failed.
    TransportError,
    /// The server is stopping.
    Shutdown,
}

impl CloseReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Idle => "idle",
            Self::TransportError => "transport_error",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives session lifecycle and request events.
///
/// All methods default to no-ops.
pub trait SessionObserver: Send + Sync {
    fn session_opened(&self, _session_id: SessionId, _principal: Option<&str>) {}

    fn session_resumed(&self, _session_id: SessionId, _cursor: Option<u64>, _replayed: usize) {}

    fn session_closed(&self, _session_id: SessionId, _reason: CloseReason, _lifetime: Duration) {}

    /// One request finished; `error` is `None` on success.
    fn request_completed(
        &self,
        _session_id: SessionId,
        _tool: &str,
        _error: Option<ErrorKind>,
        _elapsed: Duration,
    ) {
    }
}

/// Observer that emits `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn session_opened(&self, session_id: SessionId, principal: Option<&str>) {
        tracing::info!(%session_id, principal = principal.unwrap_or("-"), "session opened");
    }

    fn session_resumed(&self, session_id: SessionId, cursor: Option<u64>, replayed: usize) {
        tracing::info!(%session_id, ?cursor, replayed, "session resumed");
    }

    fn session_closed(&self, session_id: SessionId, reason: CloseReason, lifetime: Duration) {
        tracing::info!(%session_id, %reason, lifetime_ms = lifetime.as_millis(), "session closed");
    }

    fn request_completed(
        &self,
        session_id: SessionId,
        tool: &str,
        error: Option<ErrorKind>,
        elapsed: Duration,
    ) {
        match error {
            None => tracing::debug!(%session_id, tool, elapsed_ms = elapsed.as_millis(), "request completed"),
            Some(kind) => tracing::info!(%session_id, tool, %kind, elapsed_ms = elapsed.as_millis(), "request failed"),
        }
    }
}
