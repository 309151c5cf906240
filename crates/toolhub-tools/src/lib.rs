//! Tool manifests and handlers.
//!
//! Provides:
//! - Manifest format (`tools` entries and `agents`)
//! - Allow-listed factory catalog keyed by `module_reference.class_reference`
//! - Built-in tool handlers over the connectors
//! - `ToolRegistry` for loading, merging and installing bindings
//! - OAuth redirect flow for tools that need user authorization

pub mod auth;
pub mod builtin;
pub mod error;
pub mod factory;
pub mod manifest;
pub mod registry;

pub use auth::{OAuthRedirectFlow, OAuthSettings};
pub use error::ManifestError;
pub use factory::{Collaborators, FactoryCatalog};
pub use manifest::{AgentSpec, Manifest, ManifestEntry};
pub use registry::{LoadedManifest, ManifestSource, ReloadOutcome, ToolRegistry};
