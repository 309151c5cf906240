//! Shared fixtures for this crate's tests.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use toolhub_core::{
    Authenticator, CallerContext, ErrorKind, ParamType, Principal, RoutingError, SessionId,
    ToolFailure, ToolHandler, ToolParameter, ToolSchema,
};

use crate::{CloseReason, SessionConfig, SessionManager, SessionObserver};

pub const KEY: &str = "test-key";
pub const OTHER_KEY: &str = "other-key";

struct Keys;

impl Authenticator for Keys {
    fn authenticate(&self, api_key: Option<&str>) -> Result<Principal, RoutingError> {
        match api_key {
            Some(KEY) => Ok(Principal::new("tester")),
            Some(OTHER_KEY) => Ok(Principal::new("other")),
            Some(_) => Err(RoutingError::Authentication("unknown api key".into())),
            None => Err(RoutingError::Authentication("missing api key".into())),
        }
    }
}

pub fn authenticator() -> Arc<dyn Authenticator> {
    Arc::new(Keys)
}

pub fn manager() -> SessionManager {
    manager_with(SessionConfig::default())
}

pub fn manager_with(config: SessionConfig) -> SessionManager {
    SessionManager::new(config, authenticator())
}

#[derive(Default)]
pub struct Recorder {
    closed: Mutex<Vec<(SessionId, CloseReason)>>,
    completed: Mutex<Vec<(String, Option<ErrorKind>)>>,
}

impl Recorder {
    pub fn closed(&self) -> Vec<(SessionId, CloseReason)> {
        self.closed.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<(String, Option<ErrorKind>)> {
        self.completed.lock().unwrap().clone()
    }
}

impl SessionObserver for Recorder {
    fn session_closed(&self, session_id: SessionId, reason: CloseReason, _lifetime: Duration) {
        self.closed.lock().unwrap().push((session_id, reason));
    }

    fn request_completed(
        &self,
        _session_id: SessionId,
        tool: &str,
        error: Option<ErrorKind>,
        _elapsed: Duration,
    ) {
        self.completed.lock().unwrap().push((tool.to_owned(), error));
    }
}

/// Adds `a` and `b`.
pub struct Adder;

#[async_trait]
impl ToolHandler for Adder {
    fn description(&self) -> &str {
        "add"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .with(ToolParameter::new("a", ParamType::Integer).required())
            .with(ToolParameter::new("b", ParamType::Integer).required())
    }

    async fn call(&self, args: Map<String, Value>, _ctx: &CallerContext) -> Result<Value, ToolFailure> {
        let a = args["a"].as_i64().unwrap_or_default();
        let b = args["b"].as_i64().unwrap_or_default();
        Ok(json!(a + b))
    }
}

/// Sleeps for `ms` milliseconds, then returns `tag`.
pub struct Sleepy;

#[async_trait]
impl ToolHandler for Sleepy {
    fn description(&self) -> &str {
        "sleep"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .with(ToolParameter::new("ms", ParamType::Integer).required())
            .with(ToolParameter::new("tag", ParamType::String).with_default(json!("")))
    }

    async fn call(&self, args: Map<String, Value>, _ctx: &CallerContext) -> Result<Value, ToolFailure> {
        let ms = args["ms"].as_u64().unwrap_or_default();
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(args["tag"].clone())
    }
}

/// Always fails.
pub struct Failing;

#[async_trait]
impl ToolHandler for Failing {
    fn description(&self) -> &str {
        "fail"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
    }

    async fn call(&self, _args: Map<String, Value>, _ctx: &CallerContext) -> Result<Value, ToolFailure> {
        Err(ToolFailure::new("upstream exploded"))
    }
}

/// Panics.
pub struct Panicking;

#[async_trait]
impl ToolHandler for Panicking {
    fn description(&self) -> &str {
        "panic"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
    }

    async fn call(&self, _args: Map<String, Value>, _ctx: &CallerContext) -> Result<Value, ToolFailure> {
        panic!("handler bug");
    }
}

/// Returns the tenant seen through the task-local context.
pub struct Tenant;

#[async_trait]
impl ToolHandler for Tenant {
    fn description(&self) -> &str {
        "tenant"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
    }

    async fn call(&self, _args: Map<String, Value>, ctx: &CallerContext) -> Result<Value, ToolFailure> {
        let ambient = CallerContext::current().and_then(|c| c.tenant_id);
        Ok(json!({ "explicit": ctx.tenant_id, "ambient": ambient }))
    }
}
