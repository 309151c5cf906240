//! Transport layer for the tool hub.
//!
//! Provides:
//! - Wire protocol for client frames
//! - WebSocket duplex transport
//! - SSE send/receive-pair transport
//! - API-key authentication
//! - The HTTP router tying them to the session manager and dispatcher

pub mod auth;
pub mod error;
pub mod protocol;
pub mod router;
pub mod sse;
pub mod websocket;

pub use auth::StaticKeys;
pub use error::ApiError;
pub use protocol::FrameKind;
pub use router::{AppState, create_router};

#[cfg(test)]
pub(crate) mod testing;
