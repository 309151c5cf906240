use async_trait::async_trait;
use serde_json::{Map, Value};
use toolhub_core::{CallerContext, ParamType, ToolFailure, ToolHandler, ToolParameter, ToolSchema};

use super::arg_str;

/// Returns its input.
pub struct Echo;

#[async_trait]
impl ToolHandler for Echo {
    fn description(&self) -> &str {
        "Echo the given text"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new().with(ToolParameter::new("text", ParamType::String).required())
    }

    async fn call(&self, args: Map<String, Value>, _ctx: &CallerContext) -> Result<Value, ToolFailure> {
        Ok(Value::String(arg_str(&args, "text")?.to_owned()))
    }
}
