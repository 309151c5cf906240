//! Shared fixtures for this crate's tests.

use std::sync::Arc;

use toolhub_core::DispatchTable;
use toolhub_session::{Dispatcher, SessionConfig, SessionManager};
use toolhub_tools::{Collaborators, FactoryCatalog, ManifestSource, ToolRegistry};

use crate::{AppState, StaticKeys};

pub const KEY: &str = "test-key";
pub const OTHER_KEY: &str = "other-key";

const MANIFEST: &str = r#"{
    "tools": [
        {"name": "add", "module_reference": "builtin", "class_reference": "math.Add"},
        {"name": "whoami", "module_reference": "builtin", "class_reference": "context.WhoAmI"},
        {"name": "mail", "module_reference": "builtin", "class_reference": "text.Echo",
         "settings": {"oauth": {
             "authorize_url": "https://login.example.com/authorize",
             "client_id": "abc",
             "redirect_uri": "http://localhost:3000/oauth/mail/callback"
         }}}
    ],
    "agents": [
        {"name": "helper", "description": "Does sums", "tools": ["add"]}
    ]
}"#;

/// Router state with two keys and a loaded table.
pub async fn state() -> AppState {
    let keys = StaticKeys::default()
        .with_key("tester", KEY)
        .with_key("other", OTHER_KEY);
    let manager = SessionManager::new(SessionConfig::default(), Arc::new(keys));

    let table = Arc::new(DispatchTable::new());
    let registry = ToolRegistry::new(FactoryCatalog::builtin(), Collaborators::default())
        .with_sources(vec![ManifestSource::inline("test", MANIFEST)]);
    registry.reload(&table).await.unwrap();

    AppState::new(manager, Dispatcher::new(table), Arc::new(registry))
}
