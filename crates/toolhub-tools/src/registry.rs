//! Tool registry: turns manifests into dispatch-table bindings.

use std::{
    collections::HashMap,
    fmt,
    path::PathBuf,
    sync::{Arc, PoisonError, RwLock},
};

use toolhub_core::{DispatchTable, InstallReport, ToolBinding};

use crate::{
    AgentSpec, Collaborators, FactoryCatalog, Manifest, ManifestEntry, ManifestError,
    auth::{OAuthRedirectFlow, OAuthSettings},
};

/// Where a manifest document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    /// A local file.
    Path(PathBuf),
    /// A document held in memory.
    Inline { label: String, document: String },
    /// A key in the configured object store.
    Object { key: String },
}

impl ManifestSource {
    /// Parse a configured location: `store:<key>` names an object-store key,
    /// anything else is a file path.
    #[must_use]
    pub fn parse(location: &str) -> Self {
        location.strip_prefix("store:").map_or_else(
            || Self::Path(PathBuf::from(location)),
            |key| Self::Object { key: key.to_owned() },
        )
    }

    /// Inline document.
    pub fn inline(label: impl Into<String>, document: impl Into<String>) -> Self {
        Self::Inline {
            label: label.into(),
            document: document.into(),
        }
    }
}

impl fmt::Display for ManifestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Inline { label, .. } => write!(f, "inline:{label}"),
            Self::Object { key } => write!(f, "store:{key}"),
        }
    }
}

/// Bindings and agents built from one or more manifests.
#[derive(Debug, Default)]
pub struct LoadedManifest {
    pub bindings: Vec<ToolBinding>,
    pub agents: Vec<AgentSpec>,
}

/// Result of [`ToolRegistry::reload`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadOutcome {
    pub report: InstallReport,
    /// Sources that could not be loaded, with the reason.
    pub failed_sources: Vec<String>,
}

/// Loads manifests through the factory catalog.
pub struct ToolRegistry {
    catalog: FactoryCatalog,
    collaborators: Collaborators,
    sources: Vec<ManifestSource>,
    agents: RwLock<Vec<AgentSpec>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("catalog", &self.catalog)
            .field("collaborators", &self.collaborators)
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

impl ToolRegistry {
    #[must_use]
    pub fn new(catalog: FactoryCatalog, collaborators: Collaborators) -> Self {
        Self {
            catalog,
            collaborators,
            sources: Vec::new(),
            agents: RwLock::new(Vec::new()),
        }
    }

    /// Sources re-read by [`reload`](Self::reload), in precedence order (last wins).
    #[must_use]
    pub fn with_sources(mut self, sources: Vec<ManifestSource>) -> Self {
        self.sources = sources;
        self
    }

    #[must_use]
    pub fn sources(&self) -> &[ManifestSource] {
        &self.sources
    }

    /// Agents from the last reload.
    #[must_use]
    pub fn agents(&self) -> Vec<AgentSpec> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn read_document(&self, source: &ManifestSource) -> Result<String, ManifestError> {
        let source_name = source.to_string();
        match source {
            ManifestSource::Inline { document, .. } => Ok(document.clone()),
            ManifestSource::Path(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ManifestError::Read {
                    source_name,
                    source: Arc::new(e),
                }),
            ManifestSource::Object { key } => {
                let store = self.collaborators.object_store.as_ref().ok_or_else(|| {
                    ManifestError::Parse {
                        source_name: source_name.clone(),
                        message: "no object store is configured".into(),
                    }
                })?;
                let body = store.get(key).await.map_err(|e| ManifestError::Fetch {
                    source_name: source_name.clone(),
                    source: e,
                })?;
                String::from_utf8(body.to_vec()).map_err(|e| ManifestError::Parse {
                    source_name,
                    message: e.to_string(),
                })
            }
        }
    }

    /// Build one binding from a manifest entry.
    ///
    /// # Errors
    /// Any [`ManifestError`] that makes the entry unusable.
    pub fn build_entry(&self, entry: &ManifestEntry) -> Result<ToolBinding, ManifestError> {
        let handler = self.catalog.build(entry, &self.collaborators)?;
        let mut binding = ToolBinding::new(entry.name.clone(), handler);
        if let Some(description) = entry.description() {
            binding = binding.with_description(description);
        }
        if let Some(timeout) = entry.timeout()? {
            binding = binding.with_timeout(timeout);
        }
        let oauth = OAuthSettings::from_settings(&entry.settings).map_err(|message| {
            ManifestError::Entry {
                entry: entry.name.clone(),
                message,
            }
        })?;
        if let Some(oauth) = oauth {
            binding = binding.with_auth_flow(Arc::new(OAuthRedirectFlow::new(entry.name.clone(), oauth)));
        }
        Ok(binding)
    }

    /// Load one manifest. Entries that fail to build are skipped with a warning.
    ///
    /// # Errors
    /// Returns an error when the document cannot be read or parsed.
    pub async fn load_from(&self, source: &ManifestSource) -> Result<LoadedManifest, ManifestError> {
        let document = self.read_document(source).await?;
        let source_name = source.to_string();
        let manifest = Manifest::parse(&source_name, &document)?;

        let mut bindings = Vec::with_capacity(manifest.tools.len());
        for entry in &manifest.tools {
            match self.build_entry(entry) {
                Ok(binding) => bindings.push(binding),
                Err(err) => tracing::warn!(
                    manifest = %source_name,
                    tool = %entry.name,
                    error = %err,
                    "skipping manifest entry"
                ),
            }
        }
        tracing::info!(manifest = %source_name, tools = bindings.len(), agents = manifest.agents.len(), "loaded manifest");

        Ok(LoadedManifest {
            bindings,
            agents: manifest.agents,
        })
    }

    /// Merge binding sets; on a name collision the later set wins.
    #[must_use]
    pub fn merge(sets: impl IntoIterator<Item = Vec<ToolBinding>>) -> Vec<ToolBinding> {
        let mut merged: Vec<ToolBinding> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for binding in sets.into_iter().flatten() {
            if let Some(&slot) = index.get(binding.name()) {
                tracing::info!(
                    tool = %binding.name(),
                    replaced_description = %merged[slot].description(),
                    "later manifest overrides tool"
                );
                merged[slot] = binding;
            } else {
                index.insert(binding.name().to_owned(), merged.len());
                merged.push(binding);
            }
        }
        merged
    }

    /// Replace the table's contents with `bindings`.
    pub fn install(table: &DispatchTable, bindings: Vec<ToolBinding>) -> InstallReport {
        table.install(bindings)
    }

    /// Re-read every configured source and install the merged result.
    ///
    /// A source that fails is reported and skipped.
    ///
    /// # Errors
    /// Returns the last error when every source fails; the table is then left
    /// untouched.
    pub async fn reload(&self, table: &DispatchTable) -> Result<ReloadOutcome, ManifestError> {
        let mut sets = Vec::with_capacity(self.sources.len());
        let mut agents: Vec<AgentSpec> = Vec::new();
        let mut failed_sources = Vec::new();
        let mut last_error = None;

        for source in &self.sources {
            match self.load_from(source).await {
                Ok(loaded) => {
                    sets.push(loaded.bindings);
                    for agent in loaded.agents {
                        agents.retain(|a| a.name != agent.name);
                        agents.push(agent);
                    }
                }
                Err(err) => {
                    tracing::error!(manifest = %source, error = %err, "failed to load manifest");
                    failed_sources.push(format!("{source}: {err}"));
                    last_error = Some(err);
                }
            }
        }

        if let Some(err) = last_error.filter(|_| sets.is_empty()) {
            return Err(err);
        }

        let report = Self::install(table, Self::merge(sets));
        *self.agents.write().unwrap_or_else(PoisonError::into_inner) = agents;
        Ok(ReloadOutcome {
            report,
            failed_sources,
        })
    }
}
