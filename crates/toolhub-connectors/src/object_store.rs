//! Object storage connector.

use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use toolhub_core::CallerContext;

use crate::ConnectorError;

/// Key/value blob storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object.
    async fn get(&self, key: &str) -> Result<Bytes, ConnectorError>;

    /// Create or overwrite an object.
    async fn put(&self, key: &str, body: Bytes) -> Result<(), ConnectorError>;

    /// List keys beginning with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, ConnectorError>;

    /// Delete an object. Missing keys are `NotFound`.
    async fn delete(&self, key: &str) -> Result<(), ConnectorError>;
}

fn check_key(key: &str) -> Result<(), ConnectorError> {
    if key.is_empty() {
        return Err(ConnectorError::InvalidInput("object key is empty".into()));
    }
    let escapes = Path::new(key)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(ConnectorError::InvalidInput(format!(
            "object key {key:?} must be a relative path without '..'"
        )));
    }
    Ok(())
}

fn trace_call(op: &str, key: &str) {
    let tenant = CallerContext::current().and_then(|ctx| ctx.tenant_id);
    tracing::debug!(op, key, tenant = tenant.as_deref().unwrap_or("-"), "object store call");
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Bytes, ConnectorError> {
        trace_call("get", key);
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| ConnectorError::NotFound(key.to_owned()))
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<(), ConnectorError> {
        check_key(key)?;
        trace_call("put", key);
        self.objects.write().await.insert(key.to_owned(), body);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ConnectorError> {
        trace_call("list", prefix);
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), ConnectorError> {
        trace_call("delete", key);
        self.objects
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| ConnectorError::NotFound(key.to_owned()))
    }
}

/// Store rooted at a directory; keys are relative paths under it.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ConnectorError> {
        check_key(key)?;
        Ok(self.root.join(key))
    }

    async fn walk(&self, dir: PathBuf, out: &mut Vec<String>) -> Result<(), ConnectorError> {
        let mut pending = vec![dir];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    out.push(key);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> Result<Bytes, ConnectorError> {
        trace_call("get", key);
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(body) => Ok(Bytes::from(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ConnectorError::NotFound(key.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<(), ConnectorError> {
        trace_call("put", key);
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &body).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ConnectorError> {
        trace_call("list", prefix);
        let mut keys = Vec::new();
        self.walk(self.root.clone(), &mut keys).await?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), ConnectorError> {
        trace_call("delete", key);
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ConnectorError::NotFound(key.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise(store: &dyn ObjectStore) {
        store.put("docs/a.txt", Bytes::from_static(b"alpha")).await.unwrap();
        store.put("docs/b.txt", Bytes::from_static(b"beta")).await.unwrap();
        store.put("other.txt", Bytes::from_static(b"x")).await.unwrap();

        assert_eq!(store.get("docs/a.txt").await.unwrap(), Bytes::from_static(b"alpha"));
        assert_eq!(
            store.list("docs/").await.unwrap(),
            vec!["docs/a.txt".to_string(), "docs/b.txt".to_string()]
        );

        store.delete("docs/a.txt").await.unwrap();
        assert!(matches!(
            store.get("docs/a.txt").await,
            Err(ConnectorError::NotFound(_))
        ));
        assert!(matches!(
            store.delete("docs/a.txt").await,
            Err(ConnectorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_operations() {
        exercise(&MemoryObjectStore::new()).await;
    }

    #[tokio::test]
    async fn test_fs_store_operations() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&FsObjectStore::new(dir.path())).await;
    }

    #[tokio::test]
    async fn test_fs_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let err = store
            .put("../escape.txt", Bytes::from_static(b"no"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidInput(_)));
        assert!(matches!(
            store.get("/etc/passwd").await,
            Err(ConnectorError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_fs_list_on_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path().join("not-yet"));
        assert!(store.list("").await.unwrap().is_empty());
    }
}
