//! Named settings resolved from overrides and the process environment.

use std::{collections::HashMap, str::FromStr};

use thiserror::Error;

/// Settings error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("setting {key} is required")]
    Missing { key: String },
    #[error("setting {key}={value:?} is invalid: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// Key/value settings provider with defaulting.
///
/// Lookup order: explicit overrides, then (unless disabled) the process
/// environment. Empty values count as unset.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    overrides: HashMap<String, String>,
    read_env: bool,
}

impl Settings {
    /// Settings backed by the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            overrides: HashMap::new(),
            read_env: true,
        }
    }

    /// Settings backed only by `values`.
    #[must_use]
    pub fn from_map<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            overrides: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            read_env: false,
        }
    }

    /// Add an override that shadows the environment.
    #[must_use]
    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    /// Raw value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.overrides
            .get(key)
            .cloned()
            .or_else(|| {
                if self.read_env {
                    std::env::var(key).ok()
                } else {
                    None
                }
            })
            .filter(|v| !v.trim().is_empty())
    }

    /// Value for `key`, or `default`.
    #[must_use]
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_owned())
    }

    /// Value for `key`, which must be set.
    ///
    /// # Errors
    /// Returns [`SettingsError::Missing`] when unset.
    pub fn require(&self, key: &str) -> Result<String, SettingsError> {
        self.get(key).ok_or_else(|| SettingsError::Missing {
            key: key.to_owned(),
        })
    }

    /// Parsed value for `key`, or `default` when unset.
    ///
    /// # Errors
    /// Returns [`SettingsError::Invalid`] when the value does not parse.
    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T, SettingsError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|e: T::Err| SettingsError::Invalid {
                key: key.to_owned(),
                value,
                reason: e.to_string(),
            }),
        }
    }

    /// Comma-separated list for `key`; empty when unset.
    #[must_use]
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}
