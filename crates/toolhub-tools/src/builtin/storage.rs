//! Object store tools. Payloads travel base64-encoded.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde_json::{Map, Value, json};
use toolhub_connectors::ObjectStore;
use toolhub_core::{CallerContext, ParamType, ToolFailure, ToolHandler, ToolParameter, ToolSchema};

use super::arg_str;

/// Store access shared by the storage tools. Keys are scoped under `prefix`.
struct Scoped {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl Scoped {
    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    fn unscope<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(self.prefix.as_str()).unwrap_or(key)
    }
}

fn key_param() -> ToolParameter {
    ToolParameter::new("key", ParamType::String)
        .with_description("Object key")
        .required()
}

/// Fetch one object.
pub struct GetObject(Scoped);

impl GetObject {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, prefix: String) -> Self {
        Self(Scoped { store, prefix })
    }
}

#[async_trait]
impl ToolHandler for GetObject {
    fn description(&self) -> &str {
        "Read an object; returns its base64 content"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new().with(key_param())
    }

    async fn call(&self, args: Map<String, Value>, _ctx: &CallerContext) -> Result<Value, ToolFailure> {
        let key = arg_str(&args, "key")?;
        let body = self.0.store.get(&self.0.key(key)).await?;
        Ok(json!({
            "key": key,
            "size": body.len(),
            "content_base64": STANDARD.encode(&body),
        }))
    }
}

/// Create or overwrite one object.
pub struct PutObject(Scoped);

impl PutObject {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, prefix: String) -> Self {
        Self(Scoped { store, prefix })
    }
}

#[async_trait]
impl ToolHandler for PutObject {
    fn description(&self) -> &str {
        "Write an object from base64 content"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .with(key_param())
            .with(ToolParameter::new("content_base64", ParamType::String).required())
    }

    async fn call(&self, args: Map<String, Value>, _ctx: &CallerContext) -> Result<Value, ToolFailure> {
        let key = arg_str(&args, "key")?;
        let body = STANDARD
            .decode(arg_str(&args, "content_base64")?)
            .map_err(|e| ToolFailure::new(format!("content_base64 is not valid base64: {e}")))?;
        let size = body.len();
        self.0.store.put(&self.0.key(key), Bytes::from(body)).await?;
        Ok(json!({ "key": key, "size": size }))
    }
}

/// List keys.
pub struct ListObjects(Scoped);

impl ListObjects {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, prefix: String) -> Self {
        Self(Scoped { store, prefix })
    }
}

#[async_trait]
impl ToolHandler for ListObjects {
    fn description(&self) -> &str {
        "List object keys starting with a prefix"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new().with(ToolParameter::new("prefix", ParamType::String).with_default(json!("")))
    }

    async fn call(&self, args: Map<String, Value>, _ctx: &CallerContext) -> Result<Value, ToolFailure> {
        let prefix = args.get("prefix").and_then(Value::as_str).unwrap_or_default();
        let listed = self.0.store.list(&self.0.key(prefix)).await?;
        let keys: Vec<&str> = listed.iter().map(|k| self.0.unscope(k)).collect();
        Ok(json!({ "keys": keys }))
    }
}

/// Delete one object.
pub struct DeleteObject(Scoped);

impl DeleteObject {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, prefix: String) -> Self {
        Self(Scoped { store, prefix })
    }
}

#[async_trait]
impl ToolHandler for DeleteObject {
    fn description(&self) -> &str {
        "Delete an object"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new().with(key_param())
    }

    async fn call(&self, args: Map<String, Value>, _ctx: &CallerContext) -> Result<Value, ToolFailure> {
        let key = arg_str(&args, "key")?;
        self.0.store.delete(&self.0.key(key)).await?;
        Ok(json!({ "key": key, "deleted": true }))
    }
}

#[cfg(test)]
mod tests {
    use toolhub_connectors::MemoryObjectStore;

    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_put_get_list_delete_under_prefix() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let ctx = CallerContext::new();
        let prefix = "tenant-a/".to_string();

        PutObject::new(Arc::clone(&store), prefix.clone())
            .call(args(json!({"key": "notes.txt", "content_base64": "aGVsbG8="})), &ctx)
            .await
            .unwrap();
        assert_eq!(
            store.get("tenant-a/notes.txt").await.unwrap(),
            Bytes::from_static(b"hello")
        );

        let got = GetObject::new(Arc::clone(&store), prefix.clone())
            .call(args(json!({"key": "notes.txt"})), &ctx)
            .await
            .unwrap();
        assert_eq!(got["content_base64"], "aGVsbG8=");

        let listed = ListObjects::new(Arc::clone(&store), prefix.clone())
            .call(args(json!({"prefix": ""})), &ctx)
            .await
            .unwrap();
        assert_eq!(listed["keys"], json!(["notes.txt"]));

        let delete = DeleteObject::new(Arc::clone(&store), prefix);
        delete.call(args(json!({"key": "notes.txt"})), &ctx).await.unwrap();
        let missing = delete.call(args(json!({"key": "notes.txt"})), &ctx).await.unwrap_err();
        assert!(missing.message().contains("not found"));
    }

    #[tokio::test]
    async fn test_bad_base64_is_rejected() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let err = PutObject::new(store, String::new())
            .call(args(json!({"key": "k", "content_base64": "%%%"})), &CallerContext::new())
            .await
            .unwrap_err();
        assert!(err.message().contains("base64"));
    }
}
