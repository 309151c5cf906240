use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use toolhub_connectors::Publisher;
use toolhub_core::{CallerContext, ParamType, ToolFailure, ToolHandler, ToolParameter, ToolSchema};

/// Publishes an event, optionally to a topic fixed by settings.
pub struct Publish {
    publisher: Arc<dyn Publisher>,
    topic: Option<String>,
}

impl Publish {
    #[must_use]
    pub fn new(publisher: Arc<dyn Publisher>, topic: Option<String>) -> Self {
        Self { publisher, topic }
    }
}

#[async_trait]
impl ToolHandler for Publish {
    fn description(&self) -> &str {
        "Publish an event to a topic"
    }

    fn schema(&self) -> ToolSchema {
        let topic = ToolParameter::new("topic", ParamType::String);
        let topic = if self.topic.is_some() { topic } else { topic.required() };
        ToolSchema::new()
            .with(topic)
            .with(ToolParameter::new("event", ParamType::Object).required())
    }

    async fn call(&self, mut args: Map<String, Value>, ctx: &CallerContext) -> Result<Value, ToolFailure> {
        let topic = match (&self.topic, args.get("topic").and_then(Value::as_str)) {
            (Some(fixed), _) => fixed.clone(),
            (None, Some(topic)) => topic.to_owned(),
            (None, None) => return Err(ToolFailure::new("argument topic is required")),
        };
        let event = args.remove("event").unwrap_or(Value::Null);
        let envelope = json!({
            "tenant_id": ctx.tenant_id,
            "principal": ctx.principal,
            "event": event,
        });
        let delivered = self.publisher.publish(&topic, envelope).await?;
        Ok(json!({ "topic": topic, "delivered": delivered }))
    }
}
