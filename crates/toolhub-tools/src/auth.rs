//! OAuth authorization-code redirect flow for tools that act on a user's behalf.
//!
//! `authorize` redirects the user agent to the provider with a one-time
//! `state`; `callback` checks that state and acknowledges the returned code.
//! Exchanging the code for a token belongs to the provider integration.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use toolhub_core::{AuthFlow, AuthReply, ToolFailure};
use uuid::Uuid;

/// How long an issued `state` stays valid.
const STATE_TTL: Duration = Duration::from_secs(600);

/// `settings.oauth` of a manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OAuthSettings {
    pub authorize_url: String,
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scope: Option<String>,
}

impl OAuthSettings {
    /// Read `settings.oauth`, if present.
    ///
    /// # Errors
    /// Returns a message when the block is present but incomplete, or the
    /// authorize URL does not parse.
    pub fn from_settings(settings: &Map<String, Value>) -> Result<Option<Self>, String> {
        let Some(raw) = settings.get("oauth") else {
            return Ok(None);
        };
        let parsed: Self =
            serde_json::from_value(raw.clone()).map_err(|e| format!("settings.oauth: {e}"))?;
        Url::parse(&parsed.authorize_url)
            .map_err(|e| format!("settings.oauth.authorize_url: {e}"))?;
        Ok(Some(parsed))
    }
}

/// Redirect flow for one tool.
#[derive(Debug)]
pub struct OAuthRedirectFlow {
    tool: String,
    settings: OAuthSettings,
    pending: Mutex<HashMap<String, Instant>>,
}

impl OAuthRedirectFlow {
    #[must_use]
    pub fn new(tool: impl Into<String>, settings: OAuthSettings) -> Self {
        Self {
            tool: tool.into(),
            settings,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn issue_state(&self) -> String {
        let state = Uuid::new_v4().simple().to_string();
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        pending.retain(|_, issued| now.duration_since(*issued) < STATE_TTL);
        pending.insert(state.clone(), now);
        state
    }

    fn take_state(&self, state: &str) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending
            .remove(state)
            .is_some_and(|issued| issued.elapsed() < STATE_TTL)
    }
}

#[async_trait]
impl AuthFlow for OAuthRedirectFlow {
    async fn authorize(&self, _query: &HashMap<String, String>) -> Result<AuthReply, ToolFailure> {
        let state = self.issue_state();
        let mut params = vec![
            ("response_type", "code"),
            ("client_id", self.settings.client_id.as_str()),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
            ("state", state.as_str()),
        ];
        if let Some(scope) = &self.settings.scope {
            params.push(("scope", scope.as_str()));
        }
        let url = Url::parse_with_params(&self.settings.authorize_url, &params)
            .map_err(|e| ToolFailure::new(format!("invalid authorize url: {e}")))?;
        tracing::info!(tool = %self.tool, "starting authorization flow");
        Ok(AuthReply::Redirect(url.into()))
    }

    async fn callback(&self, query: &HashMap<String, String>) -> Result<AuthReply, ToolFailure> {
        if let Some(error) = query.get("error") {
            tracing::warn!(tool = %self.tool, error = %error, "provider denied authorization");
            return Err(ToolFailure::new(format!("authorization denied: {error}")));
        }
        let state = query
            .get("state")
            .ok_or_else(|| ToolFailure::new("missing state"))?;
        if !self.take_state(state) {
            return Err(ToolFailure::new("unknown or expired state"));
        }
        if query.get("code").is_none_or(String::is_empty) {
            return Err(ToolFailure::new("missing authorization code"));
        }
        tracing::info!(tool = %self.tool, "authorization code received");
        Ok(AuthReply::Json(json!({
            "tool": self.tool,
            "status": "authorized",
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow() -> OAuthRedirectFlow {
        let settings = OAuthSettings::from_settings(
            json!({"oauth": {
                "authorize_url": "https://login.example.com/authorize",
                "client_id": "abc",
                "redirect_uri": "http://localhost:3000/oauth/mail/callback",
                "scope": "mail.read offline_access"
            }})
            .as_object()
            .unwrap(),
        )
        .unwrap()
        .unwrap();
        OAuthRedirectFlow::new("mail", settings)
    }

    fn query_of(url: &str) -> HashMap<String, String> {
        Url::parse(url).unwrap().query_pairs().into_owned().collect()
    }

    #[tokio::test]
    async fn test_round_trip_consumes_state() {
        let flow = flow();
        let AuthReply::Redirect(location) = flow.authorize(&HashMap::new()).await.unwrap() else {
            panic!("expected redirect");
        };
        assert!(location.starts_with("https://login.example.com/authorize?"));
        let sent = query_of(&location);
        assert_eq!(sent["client_id"], "abc");
        assert_eq!(sent["scope"], "mail.read offline_access");

        let mut back = HashMap::new();
        back.insert("state".to_string(), sent["state"].clone());
        back.insert("code".to_string(), "xyz".to_string());
        let reply = flow.callback(&back).await.unwrap();
        assert_eq!(reply, AuthReply::Json(json!({"tool": "mail", "status": "authorized"})));

        // A state is single-use.
        assert!(flow.callback(&back).await.is_err());
    }

    #[tokio::test]
    async fn test_provider_error_is_reported() {
        let mut back = HashMap::new();
        back.insert("error".to_string(), "access_denied".to_string());
        let err = flow().callback(&back).await.unwrap_err();
        assert!(err.message().contains("access_denied"));
    }

    #[test]
    fn test_incomplete_settings_are_rejected() {
        let settings = json!({"oauth": {"client_id": "abc"}});
        assert!(OAuthSettings::from_settings(settings.as_object().unwrap()).is_err());
        assert_eq!(OAuthSettings::from_settings(&Map::new()), Ok(None));
    }
}
