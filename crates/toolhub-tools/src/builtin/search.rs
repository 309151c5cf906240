use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use toolhub_connectors::SearchIndex;
use toolhub_core::{CallerContext, ParamType, ToolFailure, ToolHandler, ToolParameter, ToolSchema};

use super::arg_str;

pub const DEFAULT_TOP: usize = 5;

/// Queries a search index.
pub struct Query {
    index: Arc<dyn SearchIndex>,
    top: usize,
}

impl Query {
    #[must_use]
    pub fn new(index: Arc<dyn SearchIndex>, top: usize) -> Self {
        Self { index, top }
    }
}

#[async_trait]
impl ToolHandler for Query {
    fn description(&self) -> &str {
        "Search indexed documents"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .with(ToolParameter::new("query", ParamType::String).required())
            .with(
                ToolParameter::new("top", ParamType::Integer)
                    .with_description("Maximum number of hits"),
            )
    }

    async fn call(&self, args: Map<String, Value>, _ctx: &CallerContext) -> Result<Value, ToolFailure> {
        let query = arg_str(&args, "query")?;
        let top = args
            .get("top")
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(self.top);
        let hits = self.index.search(query, top).await?;
        Ok(json!({ "hits": hits }))
    }
}

#[cfg(test)]
mod tests {
    use toolhub_connectors::{Document, MemorySearchIndex};

    use super::*;

    #[tokio::test]
    async fn test_query_uses_default_top() {
        let index = Arc::new(MemorySearchIndex::new());
        for id in ["a", "b", "c"] {
            index
                .index(Document {
                    id: id.into(),
                    title: id.into(),
                    body: "shared words".into(),
                })
                .await
                .unwrap();
        }
        let tool = Query::new(index, 2);
        let out = tool
            .call(json!({"query": "shared"}).as_object().cloned().unwrap(), &CallerContext::new())
            .await
            .unwrap();
        assert_eq!(out["hits"].as_array().unwrap().len(), 2);
    }
}
