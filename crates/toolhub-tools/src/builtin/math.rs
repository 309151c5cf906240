use async_trait::async_trait;
use serde_json::{Map, Value, json};
use toolhub_core::{CallerContext, ParamType, ToolFailure, ToolHandler, ToolParameter, ToolSchema};

/// Adds two integers.
pub struct Add;

#[async_trait]
impl ToolHandler for Add {
    fn description(&self) -> &str {
        "Add two integers"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .with(ToolParameter::new("a", ParamType::Integer).required())
            .with(ToolParameter::new("b", ParamType::Integer).required())
    }

    async fn call(&self, args: Map<String, Value>, _ctx: &CallerContext) -> Result<Value, ToolFailure> {
        let operand = |name: &str| {
            args.get(name)
                .and_then(Value::as_i64)
                .ok_or_else(|| ToolFailure::new(format!("argument {name} must be an integer")))
        };
        let (a, b) = (operand("a")?, operand("b")?);
        a.checked_add(b)
            .map(|sum| json!(sum))
            .ok_or_else(|| ToolFailure::new(format!("{a} + {b} overflows")))
    }
}
