//! Object storage for re-hosted media.
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::config::Media;
use crate::media::ImageKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub url: String,
    pub key: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<StoredObject>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn head(&self, key: &str) -> Result<bool>;
}

/// Fresh key for one stored binary: a v4 uuid plus the sniffed extension.
pub fn new_asset_key(kind: ImageKind) -> String {
    format!("{}.{}", Uuid::new_v4(), kind.extension())
}

fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

/// Files under a local directory, served from `public_base_url`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    pub fn from_config(media: &Media) -> Self {
        Self::new(&media.media_dir, &media.public_base_url)
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let name = Path::new(key)
            .file_name()
            .filter(|n| *n == key)
            .with_context(|| format!("invalid object key {}", key))?;
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<StoredObject> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create media dir: {}", self.root.display()))?;
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(key, content_type, size = bytes.len(), "stored object");
        Ok(StoredObject {
            url: join_url(&self.public_base_url, key),
            key: key.to_string(),
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to delete {}", path.display())),
        }
    }

    async fn head(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
    }
}

/// In-process store for tests and dry runs.
#[derive(Debug, Clone)]
pub struct MemoryObjectStore {
    base_url: String,
    objects: Arc<Mutex<HashMap<String, (Vec<u8>, String)>>>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new("memory://media")
    }
}

impl MemoryObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        let objects = self.objects.lock().ok()?;
        objects.get(key).map(|(_, ct)| ct.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<StoredObject> {
        self.objects
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?
            .insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(StoredObject {
            url: join_url(&self.base_url, key),
            key: key.to_string(),
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?
            .remove(key);
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<bool> {
        Ok(self
            .objects
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?
            .contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn keys_are_unique_and_typed() {
        let a = new_asset_key(ImageKind::Png);
        let b = new_asset_key(ImageKind::Png);
        assert_ne!(a, b);
        assert!(a.ends_with(".png"));
        assert!(new_asset_key(ImageKind::Jpeg).ends_with(".jpg"));
    }

    #[tokio::test]
    async fn local_store_put_head_delete() {
        let td = tempdir().unwrap();
        let store = LocalObjectStore::new(td.path().join("media"), "http://localhost/media/");
        let obj = store
            .put("abc.png", b"bytes".to_vec(), "image/png")
            .await
            .unwrap();
        assert_eq!(obj.url, "http://localhost/media/abc.png");
        assert!(store.head("abc.png").await.unwrap());
        assert_eq!(
            std::fs::read(td.path().join("media").join("abc.png")).unwrap(),
            b"bytes"
        );

        store.delete("abc.png").await.unwrap();
        assert!(!store.head("abc.png").await.unwrap());
        store.delete("abc.png").await.unwrap();
    }

    #[tokio::test]
    async fn local_store_rejects_path_keys() {
        let td = tempdir().unwrap();
        let store = LocalObjectStore::new(td.path(), "http://x");
        assert!(store.put("../escape.png", vec![1], "image/png").await.is_err());
    }

    #[tokio::test]
    async fn memory_store_tracks_objects() {
        let store = MemoryObjectStore::default();
        let obj = store.put("k.gif", vec![1, 2], "image/gif").await.unwrap();
        assert_eq!(obj.url, "memory://media/k.gif");
        assert_eq!(store.content_type("k.gif").as_deref(), Some("image/gif"));
        store.delete("k.gif").await.unwrap();
        assert!(store.is_empty());
    }
}
