//! Manifest loading errors.

use std::sync::Arc;

use thiserror::Error;
use toolhub_connectors::ConnectorError;

/// Errors raised while loading a manifest or building one of its entries.
#[derive(Debug, Clone, Error)]
pub enum ManifestError {
    /// The manifest document could not be read.
    #[error("cannot read manifest {source_name}: {source}")]
    Read {
        source_name: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The manifest document could not be fetched from object storage.
    #[error("cannot fetch manifest {source_name}: {source}")]
    Fetch {
        source_name: String,
        #[source]
        source: ConnectorError,
    },

    /// The manifest document is not valid.
    #[error("invalid manifest {source_name}: {message}")]
    Parse { source_name: String, message: String },

    /// One entry is malformed.
    #[error("invalid manifest entry {entry}: {message}")]
    Entry { entry: String, message: String },

    /// No factory is registered for the entry's reference.
    #[error("no factory registered for {key}")]
    UnknownFactory { key: String },

    /// The factory rejected the entry.
    #[error("factory {key} failed: {message}")]
    Factory { key: String, message: String },
}
