//! Allow-listed factory catalog.
//!
//! Manifest entries never name code directly: `module_reference` and
//! `class_reference` form a key that must be present in the catalog, and only
//! factories compiled into the binary can be registered.

use std::{collections::BTreeMap, fmt, sync::Arc};

use serde_json::{Map, Value};
use toolhub_connectors::{Completer, Embedder, ObjectStore, Publisher, SearchIndex};
use toolhub_core::ToolHandler;

use crate::{ManifestEntry, ManifestError, builtin};

/// Connectors available to factories.
///
/// Factories whose connector is absent fail, and their entries are skipped.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub object_store: Option<Arc<dyn ObjectStore>>,
    pub search: Option<Arc<dyn SearchIndex>>,
    pub completer: Option<Arc<dyn Completer>>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub publisher: Option<Arc<dyn Publisher>>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("object_store", &self.object_store.is_some())
            .field("search", &self.search.is_some())
            .field("completer", &self.completer.is_some())
            .field("embedder", &self.embedder.is_some())
            .field("publisher", &self.publisher.is_some())
            .finish()
    }
}

impl Collaborators {
    #[must_use]
    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    #[must_use]
    pub fn with_search(mut self, index: Arc<dyn SearchIndex>) -> Self {
        self.search = Some(index);
        self
    }

    #[must_use]
    pub fn with_completer(mut self, completer: Arc<dyn Completer>) -> Self {
        self.completer = Some(completer);
        self
    }

    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Fetch a connector, failing with a message that names it.
    ///
    /// # Errors
    /// Returns a description of the missing connector.
    pub fn require<T: ?Sized>(slot: Option<&Arc<T>>, what: &str) -> Result<Arc<T>, String> {
        slot.cloned()
            .ok_or_else(|| format!("{what} connector is not configured"))
    }
}

/// Builds a handler from an entry's settings.
pub type Factory =
    Arc<dyn Fn(&Map<String, Value>, &Collaborators) -> Result<Arc<dyn ToolHandler>, String> + Send + Sync>;

/// Factories keyed by `module_reference.class_reference`.
#[derive(Clone, Default)]
pub struct FactoryCatalog {
    factories: BTreeMap<String, Factory>,
}

impl fmt::Debug for FactoryCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryCatalog")
            .field("keys", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FactoryCatalog {
    /// Empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding every built-in factory under module `builtin`.
    #[must_use]
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        builtin::register_all(&mut catalog);
        catalog
    }

    /// Allow `module_reference.class_reference`.
    pub fn register<F>(&mut self, module_reference: &str, class_reference: &str, factory: F)
    where
        F: Fn(&Map<String, Value>, &Collaborators) -> Result<Arc<dyn ToolHandler>, String>
            + Send
            + Sync
            + 'static,
    {
        self.factories
            .insert(format!("{module_reference}.{class_reference}"), Arc::new(factory));
    }

    /// Allowed keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the handler for `entry`.
    ///
    /// # Errors
    /// [`ManifestError::UnknownFactory`] when the key is not allowed;
    /// [`ManifestError::Factory`] when the factory rejects the entry.
    pub fn build(
        &self,
        entry: &ManifestEntry,
        collaborators: &Collaborators,
    ) -> Result<Arc<dyn ToolHandler>, ManifestError> {
        let key = entry.factory_key();
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| ManifestError::UnknownFactory { key: key.clone() })?;
        factory(&entry.settings, collaborators).map_err(|message| ManifestError::Factory { key, message })
    }
}
