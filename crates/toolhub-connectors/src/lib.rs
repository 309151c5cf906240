//! Connector adapters over external services.
//!
//! Each connector is a narrow trait plus one or more adapters:
//! - `ObjectStore` - `MemoryObjectStore`, `FsObjectStore`
//! - `SearchIndex` - `MemorySearchIndex`
//! - `Completer` / `Embedder` - `OpenAiClient` (OpenAI-compatible HTTP)
//! - `Publisher` - `BroadcastBus`

pub mod error;
pub mod messaging;
pub mod model;
pub mod object_store;
pub mod retry;
pub mod search;

pub use error::ConnectorError;
pub use messaging::{BroadcastBus, Publisher};
pub use model::{ChatMessage, Completer, Embedder, OpenAiClient, OpenAiConfig};
pub use object_store::{FsObjectStore, MemoryObjectStore, ObjectStore};
pub use retry::RetryPolicy;
pub use search::{Document, MemorySearchIndex, SearchHit, SearchIndex};
