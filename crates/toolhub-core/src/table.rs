//! Dispatch table mapping invocation names to handler bindings.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use serde::Serialize;
use serde_json::Value;

use crate::{AuthFlow, ToolHandler, ToolSchema};

/// A handler bound under an invocation name.
#[derive(Clone)]
pub struct ToolBinding {
    name: String,
    description: String,
    schema: ToolSchema,
    handler: Arc<dyn ToolHandler>,
    timeout: Option<Duration>,
    auth_flow: Option<Arc<dyn AuthFlow>>,
}

impl fmt::Debug for ToolBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolBinding")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("timeout", &self.timeout)
            .field("has_auth_flow", &self.auth_flow.is_some())
            .finish_non_exhaustive()
    }
}

impl ToolBinding {
    /// Bind `handler` under `name`, taking description and schema from the handler.
    pub fn new(name: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            name: name.into(),
            description: handler.description().to_owned(),
            schema: handler.schema(),
            handler,
            timeout: None,
            auth_flow: None,
        }
    }

    /// Override the catalog description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Bound handler execution time.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach an auxiliary authorization flow.
    #[must_use]
    pub fn with_auth_flow(mut self, flow: Arc<dyn AuthFlow>) -> Self {
        self.auth_flow = Some(flow);
        self
    }

    /// Invocation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Catalog description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Declared input shape.
    #[must_use]
    pub const fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    /// The handler.
    #[must_use]
    pub fn handler(&self) -> &Arc<dyn ToolHandler> {
        &self.handler
    }

    /// Per-tool timeout.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Authorization flow, if the tool has one.
    #[must_use]
    pub fn auth_flow(&self) -> Option<&Arc<dyn AuthFlow>> {
        self.auth_flow.as_ref()
    }

    /// Caller-facing description of this binding.
    #[must_use]
    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.schema.to_json_schema(),
            timeout_ms: self
                .timeout
                .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
            has_auth_flow: self.auth_flow.is_some(),
        }
    }
}

/// Catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub has_auth_flow: bool,
}

/// Summary of a full-table install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub replaced: Vec<String>,
}

type Snapshot = Arc<HashMap<String, Arc<ToolBinding>>>;

/// Name to binding map used to route requests.
///
/// Readers take a cheap `Arc` snapshot; writers swap in a new map, so a
/// lookup never observes a half-applied reload.
#[derive(Default)]
pub struct DispatchTable {
    bindings: RwLock<Snapshot>,
}

impl DispatchTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table from bindings; later bindings win on name collision.
    #[must_use]
    pub fn from_bindings(bindings: impl IntoIterator<Item = ToolBinding>) -> Self {
        let table = Self::new();
        table.install(bindings);
        table
    }

    fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.bindings.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Resolve an invocation name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<ToolBinding>> {
        self.snapshot().get(name).cloned()
    }

    /// Register one binding, replacing any binding under the same name.
    ///
    /// Returns the replaced binding. Replacement is logged.
    pub fn register(&self, binding: ToolBinding) -> Option<Arc<ToolBinding>> {
        let mut guard = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = HashMap::clone(&guard);
        let name = binding.name.clone();
        let previous = next.insert(name.clone(), Arc::new(binding));
        if let Some(prev) = &previous {
            tracing::info!(
                tool = %name,
                replaced_description = %prev.description,
                "replacing existing tool binding"
            );
        } else {
            tracing::debug!(tool = %name, "registered tool binding");
        }
        *guard = Arc::new(next);
        previous
    }

    /// Remove a binding.
    pub fn unregister(&self, name: &str) -> Option<Arc<ToolBinding>> {
        let mut guard = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        if !guard.contains_key(name) {
            return None;
        }
        let mut next = HashMap::clone(&guard);
        let removed = next.remove(name);
        *guard = Arc::new(next);
        tracing::info!(tool = %name, "unregistered tool binding");
        removed
    }

    /// Replace the whole table (administrator reload).
    pub fn install(&self, bindings: impl IntoIterator<Item = ToolBinding>) -> InstallReport {
        let mut next = HashMap::new();
        for binding in bindings {
            let name = binding.name.clone();
            if next.insert(name.clone(), Arc::new(binding)).is_some() {
                tracing::info!(tool = %name, "later binding replaces earlier one during install");
            }
        }

        let mut guard = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        let old: BTreeSet<&String> = guard.keys().collect();
        let new: BTreeSet<&String> = next.keys().collect();
        let report = InstallReport {
            added: new.difference(&old).map(|s| (*s).clone()).collect(),
            removed: old.difference(&new).map(|s| (*s).clone()).collect(),
            replaced: old.intersection(&new).map(|s| (*s).clone()).collect(),
        };
        *guard = Arc::new(next);
        drop(guard);

        tracing::info!(
            added = ?report.added,
            removed = ?report.removed,
            replaced = ?report.replaced,
            "installed dispatch table"
        );
        report
    }

    /// Caller-facing catalog, sorted by name.
    #[must_use]
    pub fn catalog(&self) -> Vec<ToolDescriptor> {
        let mut tools: Vec<_> = self.snapshot().values().map(|b| b.descriptor()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Authorization flows by tool name.
    #[must_use]
    pub fn auth_flows(&self) -> Vec<(String, Arc<dyn AuthFlow>)> {
        let mut flows: Vec<_> = self
            .snapshot()
            .values()
            .filter_map(|b| b.auth_flow().map(|f| (b.name.clone(), Arc::clone(f))))
            .collect();
        flows.sort_by(|a, b| a.0.cmp(&b.0));
        flows
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
