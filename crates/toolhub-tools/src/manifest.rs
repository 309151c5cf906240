//! Manifest format.
//!
//! ```json
//! {
//!   "tools": [
//!     { "name": "add", "module_reference": "builtin", "class_reference": "math.Add",
//!       "settings": { "timeout_ms": 500 } }
//!   ],
//!   "agents": [ { "name": "helper", "description": "...", "tools": ["add"] } ]
//! }
//! ```
//!
//! Entries are parsed one at a time so a malformed entry can be skipped
//! without rejecting the whole document.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ManifestError;

/// One tool entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub module_reference: String,
    pub class_reference: String,
    #[serde(default)]
    pub settings: Map<String, Value>,
}

impl ManifestEntry {
    /// Key into the factory catalog.
    #[must_use]
    pub fn factory_key(&self) -> String {
        format!("{}.{}", self.module_reference, self.class_reference)
    }

    /// `settings.timeout_ms`, if set.
    ///
    /// # Errors
    /// Returns [`ManifestError::Entry`] when present but not a positive integer.
    pub fn timeout(&self) -> Result<Option<Duration>, ManifestError> {
        match self.settings.get("timeout_ms") {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_u64()
                .filter(|ms| *ms > 0)
                .map(|ms| Some(Duration::from_millis(ms)))
                .ok_or_else(|| ManifestError::Entry {
                    entry: self.name.clone(),
                    message: format!("settings.timeout_ms must be a positive integer, got {value}"),
                }),
        }
    }

    /// `settings.description`, if set.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.settings.get("description").and_then(Value::as_str)
    }

    fn check(&self) -> Result<(), ManifestError> {
        for (field, value) in [
            ("name", &self.name),
            ("module_reference", &self.module_reference),
            ("class_reference", &self.class_reference),
        ] {
            if value.trim().is_empty() {
                return Err(ManifestError::Entry {
                    entry: self.name.clone(),
                    message: format!("{field} is empty"),
                });
            }
        }
        Ok(())
    }
}

/// Agent listed in the caller-facing catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tools: Vec<String>,
}

/// A parsed manifest document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub tools: Vec<ManifestEntry>,
    pub agents: Vec<AgentSpec>,
}

impl Manifest {
    /// Parse a document, skipping malformed entries with a warning.
    ///
    /// # Errors
    /// Returns [`ManifestError::Parse`] when the document is not JSON or has no
    /// `tools` array.
    pub fn parse(source_name: &str, document: &str) -> Result<Self, ManifestError> {
        let parse_err = |message: String| ManifestError::Parse {
            source_name: source_name.to_owned(),
            message,
        };

        let root: Value = serde_json::from_str(document).map_err(|e| parse_err(e.to_string()))?;
        let Value::Object(mut root) = root else {
            return Err(parse_err("document must be a JSON object".into()));
        };
        let Some(Value::Array(raw_tools)) = root.remove("tools") else {
            return Err(parse_err("missing `tools` array".into()));
        };

        let mut tools = Vec::with_capacity(raw_tools.len());
        for (index, raw) in raw_tools.into_iter().enumerate() {
            let label = raw
                .get("name")
                .and_then(Value::as_str)
                .map_or_else(|| format!("#{index}"), str::to_owned);
            let parsed = serde_json::from_value::<ManifestEntry>(raw)
                .map_err(|e| ManifestError::Entry {
                    entry: label,
                    message: e.to_string(),
                })
                .and_then(|entry| entry.check().map(|()| entry));
            match parsed {
                Ok(entry) => tools.push(entry),
                Err(err) => tracing::warn!(manifest = source_name, error = %err, "skipping manifest entry"),
            }
        }

        let agents = match root.remove("agents") {
            None | Some(Value::Null) => Vec::new(),
            Some(raw) => serde_json::from_value(raw).unwrap_or_else(|e| {
                tracing::warn!(manifest = source_name, error = %e, "ignoring malformed agents list");
                Vec::new()
            }),
        };

        Ok(Self { tools, agents })
    }
}
