use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Object storage used for templates and rendered documents
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the object stored under `key`
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Store `data` under `key` and return the key it was stored under
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str)
        -> Result<String, StoreError>;
}

/// In-memory object storage
pub struct InMemoryStore {
    objects: Arc<RwLock<HashMap<String, (Vec<u8>, String)>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Content type an object was stored with
    pub async fn content_type(&self, key: &str) -> Option<String> {
        let objects = self.objects.read().await;
        objects.get(key).map(|(_, content_type)| content_type.clone())
    }

    pub async fn keys(&self) -> Vec<String> {
        let objects = self.objects.read().await;
        let mut keys: Vec<_> = objects.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let objects = self.objects.read().await;
        objects
            .get(key)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError> {
        let mut objects = self.objects.write().await;
        objects.insert(key.to_string(), (data, content_type.to_string()));
        Ok(key.to_string())
    }
}

/// Object storage backed by a local directory; keys are relative paths.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && !key
                .split('/')
                .any(|segment| segment.is_empty() || segment == "." || segment == "..")
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => {
                tracing::debug!(key, bytes = data.len(), "Read object from disk");
                Ok(data)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;
        tracing::debug!(key, bytes = data.len(), "Wrote object to disk");
        Ok(key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_put_and_get() {
        let store = InMemoryStore::new();
        let key = store
            .put("documents/final/a.pdf", b"%PDF".to_vec(), "application/pdf")
            .await
            .unwrap();
        assert_eq!(key, "documents/final/a.pdf");
        assert_eq!(store.get(&key).await.unwrap(), b"%PDF");
        assert_eq!(
            store.content_type(&key).await.as_deref(),
            Some("application/pdf")
        );
    }

    #[tokio::test]
    async fn test_in_memory_missing_key() {
        let store = InMemoryStore::new();
        let err = store.get("nope.svg").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref k) if k == "nope.svg"));
    }

    #[tokio::test]
    async fn test_local_store_roundtrip_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        store
            .put("documents/final/job-1.pdf", b"%PDF-1.7".to_vec(), "application/pdf")
            .await
            .unwrap();
        assert!(dir.path().join("documents/final/job-1.pdf").exists());
        assert_eq!(
            store.get("documents/final/job-1.pdf").await.unwrap(),
            b"%PDF-1.7"
        );
    }

    #[tokio::test]
    async fn test_local_store_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        assert!(matches!(
            store.get("t.svg").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_local_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        for key in ["../secret", "/etc/passwd", "a//b", "", "a/./b", "./a", "a/.", "a/../b"] {
            let err = store.get(key).await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidKey(_)), "{key}");
        }
    }

    #[tokio::test]
    async fn test_local_store_dotted_names_are_plain_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store
            .put("a/.hidden/..b.svg", b"<svg/>".to_vec(), "image/svg+xml")
            .await
            .unwrap();
        assert_eq!(store.get("a/.hidden/..b.svg").await.unwrap(), b"<svg/>");
        assert!(matches!(
            store.get("a/b.svg").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }
}
