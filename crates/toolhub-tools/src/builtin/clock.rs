use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, Utc};
use serde_json::{Map, Value};
use toolhub_core::{CallerContext, ToolFailure, ToolHandler, ToolSchema};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

/// Reports the current date or time.
///
/// Renders in the server's local zone unless a fixed UTC offset is configured
/// (`settings.utc_offset_minutes`).
pub struct Clock {
    format: &'static str,
    description: &'static str,
    offset: Option<FixedOffset>,
}

impl Clock {
    #[must_use]
    pub const fn today(offset: Option<FixedOffset>) -> Self {
        Self {
            format: DATE_FORMAT,
            description: "Retrieve today's date (YYYY-MM-DD)",
            offset,
        }
    }

    #[must_use]
    pub const fn now(offset: Option<FixedOffset>) -> Self {
        Self {
            format: TIME_FORMAT,
            description: "Retrieve the current time (HH:MM)",
            offset,
        }
    }

    fn render(&self, at: DateTime<Utc>) -> String {
        match self.offset {
            Some(offset) => at.with_timezone(&offset).format(self.format).to_string(),
            None => at.with_timezone(&Local).format(self.format).to_string(),
        }
    }
}

pub(super) fn offset_setting(settings: &Map<String, Value>) -> Result<Option<FixedOffset>, String> {
    match settings.get("utc_offset_minutes") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .and_then(|minutes| i32::try_from(minutes).ok())
            .and_then(|minutes| minutes.checked_mul(60))
            .and_then(FixedOffset::east_opt)
            .map(Some)
            .ok_or_else(|| format!("settings.utc_offset_minutes must be within a day, got {value}")),
    }
}

#[async_trait]
impl ToolHandler for Clock {
    fn description(&self) -> &str {
        self.description
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
    }

    async fn call(&self, _args: Map<String, Value>, _ctx: &CallerContext) -> Result<Value, ToolFailure> {
        Ok(Value::String(self.render(Utc::now())))
    }
}
