//! Chat completion and embedding connectors.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, header::HeaderMap};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use toolhub_core::CallerContext;

use crate::{ConnectorError, RetryPolicy};

/// Default embedding input budget, in estimated tokens.
pub const DEFAULT_EMBEDDING_TOKEN_BUDGET: usize = 8192;

/// Rough bytes-per-token ratio used to estimate input size.
const BYTES_PER_TOKEN: usize = 4;

/// One chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Produces a chat completion.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ConnectorError>;
}

/// Produces an embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ConnectorError>;
}

/// Cut `text` to at most `budget` estimated tokens, on a char boundary.
#[must_use]
pub fn truncate_to_token_budget(text: &str, budget: usize) -> &str {
    let max_bytes = budget.saturating_mul(BYTES_PER_TOKEN);
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Delay hint from `retry-after-ms` (milliseconds) or `retry-after` (seconds).
///
/// Values too large for a [`Duration`] are ignored.
#[must_use]
pub fn retry_hint(headers: &HeaderMap) -> Option<Duration> {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
    };
    read("retry-after-ms")
        .and_then(|ms| Duration::try_from_secs_f64(ms / 1000.0).ok())
        .or_else(|| read("retry-after").and_then(|secs| Duration::try_from_secs_f64(secs).ok()))
}

/// Settings for [`OpenAiClient`].
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub chat_model: String,
    pub embedding_model: String,
    pub max_tokens: u32,
    pub embedding_token_budget: usize,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".into(),
            api_key: None,
            chat_model: "gpt-4o-mini".into(),
            embedding_model: "text-embedding-3-small".into(),
            max_tokens: 800,
            embedding_token_budget: DEFAULT_EMBEDDING_TOKEN_BUDGET,
            request_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Client for OpenAI-compatible `chat/completions` and `embeddings` endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    config: OpenAiConfig,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

impl OpenAiClient {
    /// Build a client.
    ///
    /// # Errors
    /// Returns [`ConnectorError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: OpenAiConfig) -> Result<Self, ConnectorError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.api_base.trim_end_matches('/'))
    }

    async fn post_once(&self, path: &str, body: &Value) -> Result<Value, ConnectorError> {
        let mut request = self.http.post(self.url(path)).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ConnectorError::RateLimited {
                retry_after: retry_hint(response.headers()),
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ConnectorError::Transport(format!("{path} returned {status}: {text}")));
        }
        Ok(response.json::<Value>().await?)
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, ConnectorError> {
        self.config
            .retry
            .run(path, || self.post_once(path, &body))
            .await
    }
}

fn end_user() -> Option<String> {
    CallerContext::current().and_then(|ctx| ctx.principal.or(ctx.tenant_id))
}

#[async_trait]
impl Completer for OpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ConnectorError> {
        let mut body = json!({
            "model": self.config.chat_model,
            "messages": messages,
            "max_tokens": self.config.max_tokens,
        });
        if let Some(user) = end_user() {
            body["user"] = Value::String(user);
        }

        let raw = self.post("chat/completions", body).await?;
        let parsed: ChatResponse = serde_json::from_value(raw)
            .map_err(|e| ConnectorError::Transport(format!("unexpected completion body: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ConnectorError::Transport("completion returned no choices".into()))
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ConnectorError> {
        let input = truncate_to_token_budget(text, self.config.embedding_token_budget);
        if input.len() < text.len() {
            tracing::warn!(
                original_bytes = text.len(),
                kept_bytes = input.len(),
                "embedding input over token budget, truncated"
            );
        }

        let raw = self
            .post(
                "embeddings",
                json!({ "model": self.config.embedding_model, "input": input }),
            )
            .await?;
        let parsed: EmbeddingResponse = serde_json::from_value(raw)
            .map_err(|e| ConnectorError::Transport(format!("unexpected embedding body: {e}")))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ConnectorError::Transport("embedding returned no data".into()))
    }
}
