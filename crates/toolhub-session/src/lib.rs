//! Session lifecycle and request routing.
//!
//! Provides:
//! - `SessionManager` - Open, resume, close and reap sessions
//! - `ResponseWriter` - Per-session ordered delivery with replay history
//! - `Dispatcher` - Decode, route, validate and run one request
//! - `SessionObserver` - Telemetry hooks

pub mod dispatcher;
pub mod manager;
pub mod observer;
pub mod session;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::Dispatcher;
pub use manager::{Handshake, SessionConfig, SessionManager};
pub use observer::{CloseReason, SessionObserver, TracingObserver};
pub use session::{Activity, RequestGuard, Session};
pub use writer::{DrainExit, OutboundRx, OutboundTx, ResponseSlot, ResponseWriter};
