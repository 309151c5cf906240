//! Assembles connectors, the tool registry, sessions and the router state.

use std::sync::Arc;

use anyhow::Context as _;
use toolhub_connectors::{
    BroadcastBus, FsObjectStore, MemoryObjectStore, MemorySearchIndex, ObjectStore, OpenAiClient,
};
use toolhub_core::DispatchTable;
use toolhub_session::{Dispatcher, SessionManager};
use toolhub_tools::{Collaborators, FactoryCatalog, ManifestSource, ToolRegistry};
use toolhub_transport::{AppState, StaticKeys};

use crate::config::ServerConfig;

const BUILTIN_MANIFEST: &str = include_str!("../manifests/builtin.json");
const LLM_MANIFEST: &str = include_str!("../manifests/llm.json");

/// Connector instances handed to tool factories.
///
/// # Errors
/// Fails when the completion client cannot be built.
pub fn collaborators(config: &ServerConfig) -> anyhow::Result<Collaborators> {
    let store: Arc<dyn ObjectStore> = match &config.storage_root {
        Some(root) => {
            tracing::info!(root = %root.display(), "using filesystem object store");
            Arc::new(FsObjectStore::new(root.clone()))
        }
        None => Arc::new(MemoryObjectStore::new()),
    };

    let mut collaborators = Collaborators::default()
        .with_object_store(store)
        .with_search(Arc::new(MemorySearchIndex::new()))
        .with_publisher(Arc::new(BroadcastBus::default()));

    if let Some(openai) = &config.openai {
        let client = Arc::new(
            OpenAiClient::new(openai.clone()).context("building completion client")?,
        );
        tracing::info!(api_base = %openai.api_base, model = %openai.chat_model, "completion backend configured");
        collaborators = collaborators
            .with_completer(client.clone())
            .with_embedder(client);
    }
    Ok(collaborators)
}

/// Manifest sources in precedence order (last wins).
#[must_use]
pub fn manifest_sources(config: &ServerConfig) -> Vec<ManifestSource> {
    if !config.manifests.is_empty() {
        return config
            .manifests
            .iter()
            .map(|location| ManifestSource::parse(location))
            .collect();
    }
    let mut sources = vec![ManifestSource::inline("builtin", BUILTIN_MANIFEST)];
    if config.openai.is_some() {
        sources.push(ManifestSource::inline("builtin-llm", LLM_MANIFEST));
    }
    sources
}

/// Build the router state and load the tool table.
///
/// # Errors
/// Fails when no manifest source can be loaded.
pub async fn build_state(config: &ServerConfig) -> anyhow::Result<AppState> {
    let keys = StaticKeys::parse(&config.api_keys);
    if keys.is_open() {
        tracing::warn!("no API keys configured (TOOLHUB_API_KEYS); every caller is accepted");
    } else {
        tracing::info!(keys = keys.len(), "API key authentication enabled");
    }
    let manager = SessionManager::new(config.session.clone(), Arc::new(keys));

    let registry = ToolRegistry::new(FactoryCatalog::builtin(), collaborators(config)?)
        .with_sources(manifest_sources(config));
    let table = Arc::new(DispatchTable::new());
    let outcome = registry
        .reload(&table)
        .await
        .context("loading tool manifests")?;
    for failed in &outcome.failed_sources {
        tracing::warn!(source = %failed, "manifest source skipped");
    }
    tracing::info!(tools = table.len(), agents = registry.agents().len(), "tool table ready");

    Ok(AppState::new(manager, Dispatcher::new(table), Arc::new(registry))
        .with_heartbeat(config.heartbeat))
}
