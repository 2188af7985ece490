use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{IngestError, Result};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
}

/// Objects laid out on disk as `<root>/<bucket>/<key>`.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let relative = Path::new(bucket).join(key);
        let escapes = bucket.is_empty()
            || key.is_empty()
            || relative
                .components()
                .any(|component| !matches!(component, Component::Normal(_)));
        if escapes {
            return Err(IngestError::ObjectStore(format!(
                "invalid object location '{bucket}/{key}'"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        log::debug!("Reading object {}", path.display());
        tokio::fs::read(&path).await.map_err(|err| {
            IngestError::ObjectStore(format!("failed to read {}: {err}", path.display()))
        })
    }
}

/// Objects held in process memory.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_object(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert((bucket.to_string(), key.to_string()), body.into());
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| IngestError::ObjectStore("object map poisoned".to_string()))?;
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| IngestError::ObjectStore(format!("no such object '{bucket}/{key}'")))
    }
}
