//! Server configuration from `TOOLHUB_*` and `OPENAI_*` settings.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use toolhub_connectors::{OpenAiConfig, RetryPolicy};
use toolhub_core::{Settings, SettingsError, event_log::DEFAULT_HISTORY_BYTES};
use toolhub_session::SessionConfig;

pub const DEFAULT_ADDR: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
    3000,
);

/// Everything `main` needs to assemble the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Raw `label:key` list; empty means the server runs open.
    pub api_keys: String,
    pub session: SessionConfig,
    pub heartbeat: Duration,
    /// Manifest locations; the built-in catalog is used when empty.
    pub manifests: Vec<String>,
    /// Filesystem object store root; in-memory when unset.
    pub storage_root: Option<PathBuf>,
    /// Completion/embedding backend, when an API key is configured.
    pub openai: Option<OpenAiConfig>,
}

impl ServerConfig {
    /// Resolve the configuration.
    ///
    /// # Errors
    /// Returns the first setting that does not parse.
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        let session = SessionConfig {
            max_sessions: settings.parse_or("TOOLHUB_MAX_SESSIONS", 1024)?,
            idle_timeout: positive_secs(settings, "TOOLHUB_IDLE_TIMEOUT_SECS", 900)?,
            reap_interval: positive_secs(settings, "TOOLHUB_REAP_INTERVAL_SECS", 30)?,
            history_bytes: settings.parse_or("TOOLHUB_EVENT_HISTORY_BYTES", DEFAULT_HISTORY_BYTES)?,
        };

        Ok(Self {
            addr: settings.parse_or("TOOLHUB_ADDR", DEFAULT_ADDR)?,
            api_keys: settings.get_or("TOOLHUB_API_KEYS", ""),
            session,
            heartbeat: positive_secs(settings, "TOOLHUB_HEARTBEAT_SECS", 15)?,
            manifests: settings.list("TOOLHUB_MANIFESTS"),
            storage_root: settings.get("TOOLHUB_STORAGE_ROOT").map(PathBuf::from),
            openai: openai_config(settings)?,
        })
    }
}

fn positive_secs(settings: &Settings, key: &str, default: u64) -> Result<Duration, SettingsError> {
    match settings.parse_or(key, default)? {
        0 => Err(SettingsError::Invalid {
            key: key.to_owned(),
            value: "0".into(),
            reason: "must be at least 1".into(),
        }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn openai_config(settings: &Settings) -> Result<Option<OpenAiConfig>, SettingsError> {
    let Some(api_key) = settings.get("OPENAI_API_KEY") else {
        return Ok(None);
    };
    let defaults = OpenAiConfig::default();
    Ok(Some(OpenAiConfig {
        api_base: settings.get_or("OPENAI_API_BASE", &defaults.api_base),
        api_key: Some(api_key),
        chat_model: settings.get_or("OPENAI_CHAT_MODEL", &defaults.chat_model),
        embedding_model: settings.get_or("OPENAI_EMBEDDING_MODEL", &defaults.embedding_model),
        retry: RetryPolicy {
            max_retries: settings.parse_or("OPENAI_MAX_RETRIES", defaults.retry.max_retries)?,
            ..defaults.retry
        },
        ..defaults
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_settings(&Settings::from_map::<&str, &str>([])).unwrap();
        assert_eq!(config.addr, DEFAULT_ADDR);
        assert_eq!(config.session, SessionConfig::default());
        assert_eq!(config.heartbeat, Duration::from_secs(15));
        assert!(config.api_keys.is_empty());
        assert!(config.manifests.is_empty());
        assert!(config.storage_root.is_none());
        assert!(config.openai.is_none());
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::from_map([
            ("TOOLHUB_ADDR", "0.0.0.0:8080"),
            ("TOOLHUB_API_KEYS", "ops:k1"),
            ("TOOLHUB_MAX_SESSIONS", "8"),
            ("TOOLHUB_IDLE_TIMEOUT_SECS", "60"),
            ("TOOLHUB_MANIFESTS", "a.json, store:b.json"),
            ("TOOLHUB_STORAGE_ROOT", "/var/lib/toolhub"),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_CHAT_MODEL", "gpt-test"),
            ("OPENAI_MAX_RETRIES", "2"),
        ]);
        let config = ServerConfig::from_settings(&settings).unwrap();
        assert_eq!(config.addr.port(), 8080);
        assert_eq!(config.api_keys, "ops:k1");
        assert_eq!(config.session.max_sessions, 8);
        assert_eq!(config.session.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.manifests, vec!["a.json", "store:b.json"]);
        assert_eq!(config.storage_root, Some(PathBuf::from("/var/lib/toolhub")));

        let openai = config.openai.unwrap();
        assert_eq!(openai.api_key.as_deref(), Some("sk-test"));
        assert_eq!(openai.chat_model, "gpt-test");
        assert_eq!(openai.embedding_model, OpenAiConfig::default().embedding_model);
        assert_eq!(openai.retry.max_retries, 2);
    }

    #[test]
    fn test_invalid_values() {
        let bad_port = Settings::from_map([("TOOLHUB_ADDR", "localhost")]);
        assert!(matches!(
            ServerConfig::from_settings(&bad_port),
            Err(SettingsError::Invalid { key, .. }) if key == "TOOLHUB_ADDR"
        ));

        let zero = Settings::from_map([("TOOLHUB_REAP_INTERVAL_SECS", "0")]);
        assert!(ServerConfig::from_settings(&zero).is_err());
    }
}
