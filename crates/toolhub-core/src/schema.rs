//! Tool parameter schemas and argument validation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value, json};

use crate::RoutingError;

/// Type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// JSON Schema type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// A single declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ToolParameter {
    /// Declare an optional parameter.
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
            default: None,
        }
    }

    /// Add a description surfaced in the catalog.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the parameter as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Value used when the caller omits the parameter.
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    fn coerce(&self, value: Value) -> Result<Value, String> {
        match (self.param_type, value) {
            (ParamType::Integer, Value::Number(n)) => integer_from_number(&n),
            (ParamType::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("expected an integer, got {s:?}")),
            (ParamType::Number, Value::Number(n)) => Ok(Value::Number(n)),
            (ParamType::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("expected a number, got {s:?}")),
            (ParamType::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
            (ParamType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(format!("expected a boolean, got {s:?}")),
            },
            (ParamType::String, Value::String(s)) => Ok(Value::String(s)),
            (ParamType::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
            (ParamType::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),
            (ParamType::Array, v @ Value::Array(_)) | (ParamType::Object, v @ Value::Object(_)) => {
                Ok(v)
            }
            (expected, other) => Err(format!(
                "expected {}, got {}",
                expected.as_str(),
                json_type_name(&other)
            )),
        }
    }
}

fn integer_from_number(n: &Number) -> Result<Value, String> {
    if let Some(i) = n.as_i64() {
        return Ok(Value::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Ok(Value::from(u));
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 => {
            Ok(Value::from(f as i64))
        }
        _ => Err(format!("expected an integer, got {n}")),
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Declared input shape of a tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub parameters: Vec<ToolParameter>,
}

impl ToolSchema {
    /// Empty schema: any object is accepted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter.
    #[must_use]
    pub fn with(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Validate and coerce arguments.
    ///
    /// Required parameters must be present and non-null; declared parameters
    /// are coerced to their type and missing optional ones take their default.
    /// Undeclared keys pass through untouched.
    ///
    /// # Errors
    /// Returns [`RoutingError::InvalidArguments`] naming the first offending field.
    pub fn validate(&self, mut args: Map<String, Value>) -> Result<Map<String, Value>, RoutingError> {
        for param in &self.parameters {
            match args.remove(&param.name) {
                None | Some(Value::Null) => {
                    if let Some(default) = &param.default {
                        args.insert(param.name.clone(), default.clone());
                    } else if param.required {
                        return Err(RoutingError::invalid_argument(
                            &param.name,
                            "required parameter is missing",
                        ));
                    }
                }
                Some(value) => {
                    let coerced = param
                        .coerce(value)
                        .map_err(|reason| RoutingError::invalid_argument(&param.name, reason))?;
                    args.insert(param.name.clone(), coerced);
                }
            }
        }
        Ok(args)
    }

    /// JSON Schema rendering for the caller-facing catalog.
    #[must_use]
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(param.param_type.as_str()));
            if let Some(description) = &param.description {
                prop.insert("description".into(), json!(description));
            }
            if let Some(default) = &param.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(param.name.clone(), Value::Object(prop));
            if param.required {
                required.push(json!(param.name));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}
