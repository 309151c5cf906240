//! Core abstractions for routing tool invocations.
//!
//! This crate provides the fundamental building blocks:
//! - `CallerContext` - Per-request identity, bound as a task-local during a call
//! - `RequestEnvelope` - A decoded tool invocation
//! - `ServerMessage` / `EventLog` - Outbound messages and replay history
//! - `DispatchTable` - Name to handler bindings
//! - `ToolHandler`, `AuthFlow` and `Authenticator` traits

pub mod context;
pub mod envelope;
pub mod error;
pub mod event_log;
pub mod message;
pub mod schema;
pub mod settings;
pub mod table;
pub mod traits;

pub use context::CallerContext;
pub use envelope::{CorrelationId, DecodeFailure, RequestEnvelope};
pub use error::{ErrorKind, RoutingError};
pub use event_log::EventLog;
pub use message::{Outbound, ServerMessage};
pub use schema::{ParamType, ToolParameter, ToolSchema};
pub use settings::{Settings, SettingsError};
pub use table::{DispatchTable, InstallReport, ToolBinding, ToolDescriptor};
pub use traits::{
    AuthFlow, AuthReply, Authenticator, Principal, SessionId, ToolFailure, ToolHandler,
};
