use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use toolhub_connectors::{ChatMessage, Completer, Embedder};
use toolhub_core::{CallerContext, ParamType, ToolFailure, ToolHandler, ToolParameter, ToolSchema};

use super::arg_str;

/// Chat completion of a prompt.
pub struct Complete {
    completer: Arc<dyn Completer>,
    system: Option<String>,
}

impl Complete {
    #[must_use]
    pub fn new(completer: Arc<dyn Completer>, system: Option<String>) -> Self {
        Self { completer, system }
    }
}

#[async_trait]
impl ToolHandler for Complete {
    fn description(&self) -> &str {
        "Complete a prompt with the configured chat model"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .with(ToolParameter::new("prompt", ParamType::String).required())
            .with(
                ToolParameter::new("system", ParamType::String)
                    .with_description("System instructions; overrides the configured default"),
            )
    }

    async fn call(&self, args: Map<String, Value>, _ctx: &CallerContext) -> Result<Value, ToolFailure> {
        let system = args
            .get("system")
            .and_then(Value::as_str)
            .or(self.system.as_deref());
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(arg_str(&args, "prompt")?));

        let text = self.completer.complete(&messages).await?;
        Ok(Value::String(text))
    }
}

/// Embedding vector of a text.
pub struct Embed {
    embedder: Arc<dyn Embedder>,
}

impl Embed {
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl ToolHandler for Embed {
    fn description(&self) -> &str {
        "Compute an embedding vector"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new().with(ToolParameter::new("text", ParamType::String).required())
    }

    async fn call(&self, args: Map<String, Value>, _ctx: &CallerContext) -> Result<Value, ToolFailure> {
        let vector = self.embedder.embed(arg_str(&args, "text")?).await?;
        Ok(json!({ "dimensions": vector.len(), "embedding": vector }))
    }
}

const FOLLOW_UP_PROMPT: &str = "You generate follow-up questions. Based on the user's input, \
write {count} concise question(s) that clarify or expand the conversation, one per line, \
without numbering.";

/// Suggests follow-up questions for a user message.
pub struct FollowUp {
    completer: Arc<dyn Completer>,
    count: usize,
}

impl FollowUp {
    #[must_use]
    pub fn new(completer: Arc<dyn Completer>, count: usize) -> Self {
        Self { completer, count }
    }
}

#[async_trait]
impl ToolHandler for FollowUp {
    fn description(&self) -> &str {
        "Create follow-up questions based on user input"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new().with(ToolParameter::new("user_input", ParamType::String).required())
    }

    async fn call(&self, args: Map<String, Value>, _ctx: &CallerContext) -> Result<Value, ToolFailure> {
        let messages = [
            ChatMessage::system(FOLLOW_UP_PROMPT.replace("{count}", &self.count.to_string())),
            ChatMessage::user(arg_str(&args, "user_input")?),
        ];
        let text = self.completer.complete(&messages).await?;
        let questions: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .take(self.count)
            .collect();
        Ok(json!(questions))
    }
}
