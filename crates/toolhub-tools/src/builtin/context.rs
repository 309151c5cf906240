use async_trait::async_trait;
use serde_json::{Map, Value, json};
use toolhub_core::{CallerContext, ToolFailure, ToolHandler, ToolSchema};

/// Reports the caller context bound to the running request.
///
/// Reads the task-local rather than the explicit parameter, so it also shows
/// what connectors called from inside a handler would see.
pub struct WhoAmI;

#[async_trait]
impl ToolHandler for WhoAmI {
    fn description(&self) -> &str {
        "Describe the calling session, principal and tenant"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
    }

    async fn call(&self, _args: Map<String, Value>, ctx: &CallerContext) -> Result<Value, ToolFailure> {
        let (source, current) = match CallerContext::current() {
            Some(current) => ("task_local", current),
            None => ("argument", ctx.clone()),
        };
        Ok(json!({
            "session_id": current.session_id,
            "principal": current.principal,
            "tenant_id": current.tenant_id,
            "has_access_token": current.access_token.is_some(),
            "metadata": current.metadata,
            "source": source,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_task_local_context() {
        let scoped = CallerContext::new().with_tenant("acme");
        let out = scoped
            .scope(async { WhoAmI.call(Map::new(), &CallerContext::new()).await })
            .await
            .unwrap();
        assert_eq!(out["tenant_id"], "acme");
        assert_eq!(out["source"], "task_local");

        let unscoped = WhoAmI
            .call(Map::new(), &CallerContext::new().with_principal("ops"))
            .await
            .unwrap();
        assert_eq!(unscoped["principal"], "ops");
        assert_eq!(unscoped["source"], "argument");
    }
}
