//! Caller context for a single tool invocation.

use std::{collections::HashMap, fmt, future::Future};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::traits::SessionId;

tokio::task_local! {
    static CURRENT: CallerContext;
}

/// Identity and metadata of the caller behind one request.
///
/// A session carries the context captured at handshake time; the dispatcher
/// clones it per request, applies that request's overrides and scopes it over
/// exactly one handler call. Connectors reached from inside the call can read
/// it back with [`CallerContext::current`].
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallerContext {
    /// Session the request arrived on.
    #[serde(default)]
    pub session_id: Option<SessionId>,

    /// Label of the API key that authenticated the session.
    #[serde(default)]
    pub principal: Option<String>,

    /// Tenant the caller acts for.
    #[serde(default)]
    pub tenant_id: Option<String>,

    /// Upstream access token forwarded to connectors. Never serialized.
    #[serde(skip)]
    pub access_token: Option<String>,

    /// Arbitrary metadata supplied by the caller.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl fmt::Debug for CallerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerContext")
            .field("session_id", &self.session_id)
            .field("principal", &self.principal)
            .field("tenant_id", &self.tenant_id)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl CallerContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context owned by a session.
    #[must_use]
    pub fn for_session(session_id: SessionId) -> Self {
        Self {
            session_id: Some(session_id),
            ..Self::default()
        }
    }

    /// Set the authenticated principal.
    #[must_use]
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Set the tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Get a metadata value by key.
    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Set a metadata value.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Apply per-request overrides.
    ///
    /// `tenant_id` and `access_token` string values replace the corresponding
    /// fields; every other key lands in `metadata`. The session id and
    /// principal are fixed by the handshake and cannot be overridden.
    pub fn apply_overrides(&mut self, overrides: &Map<String, Value>) {
        for (key, value) in overrides {
            match (key.as_str(), value) {
                ("tenant_id", Value::String(tenant)) => self.tenant_id = Some(tenant.clone()),
                ("access_token", Value::String(token)) => {
                    self.access_token = Some(token.clone());
                }
                ("session_id" | "principal", _) => {
                    tracing::debug!(key = %key, "ignoring override of handshake-bound context field");
                }
                _ => {
                    self.metadata.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Parse a `user-context` header value (a JSON object) into overrides.
    ///
    /// # Errors
    /// Returns an error if the value is not a JSON object.
    pub fn parse_user_context(raw: &str) -> Result<Map<String, Value>, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Run `fut` with this context bound as the current caller context.
    pub async fn scope<F>(self, fut: F) -> F::Output
    where
        F: Future,
    {
        CURRENT.scope(self, fut).await
    }

    /// The context bound to the running request, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT.try_with(Clone::clone).ok()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn test_overrides_split_known_fields_from_metadata() {
        let mut ctx = CallerContext::new().with_principal("ops");
        let overrides = json!({
            "tenant_id": "contoso",
            "access_token": "tok",
            "principal": "intruder",
            "locale": "en-GB"
        });
        ctx.apply_overrides(overrides.as_object().unwrap());

        assert_eq!(ctx.tenant_id.as_deref(), Some("contoso"));
        assert_eq!(ctx.access_token.as_deref(), Some("tok"));
        assert_eq!(ctx.principal.as_deref(), Some("ops"));
        assert_eq!(ctx.get_metadata("locale"), Some(&json!("en-GB")));
    }

    #[test]
    fn test_access_token_is_not_serialized_or_printed() {
        let mut ctx = CallerContext::for_session(Uuid::new_v4());
        ctx.access_token = Some("secret".to_string());

        let json = serde_json::to_string(&ctx).unwrap();
        assert!(!json.contains("secret"));
        assert!(!format!("{ctx:?}").contains("secret"));
    }

    #[tokio::test]
    async fn test_scope_is_visible_only_inside_the_call() {
        assert!(CallerContext::current().is_none());

        let ctx = CallerContext::new().with_tenant("a");
        let seen = ctx
            .scope(async { CallerContext::current().and_then(|c| c.tenant_id) })
            .await;
        assert_eq!(seen.as_deref(), Some("a"));

        assert!(CallerContext::current().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_scopes_do_not_leak() {
        let a = tokio::spawn(CallerContext::new().with_tenant("a").scope(async {
            tokio::task::yield_now().await;
            CallerContext::current().and_then(|c| c.tenant_id)
        }));
        let b = tokio::spawn(CallerContext::new().with_tenant("b").scope(async {
            tokio::task::yield_now().await;
            CallerContext::current().and_then(|c| c.tenant_id)
        }));

        assert_eq!(a.await.unwrap().as_deref(), Some("a"));
        assert_eq!(b.await.unwrap().as_deref(), Some("b"));
    }
}
