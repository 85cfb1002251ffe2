//! File-backed storage: one JSON document on disk holding the whole key space.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::traits::StorageAdapter;
use crate::error::StorageError;

/// Durable storage rewriting a single JSON object file on every mutation.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves the previous document intact.
pub struct FileStorage {
    path: PathBuf,
    /// Serializes read-modify-write of the document itself.
    io: Mutex<()>,
}

impl FileStorage {
    /// Open storage at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        info!(path = %path.display(), "File storage opened");
        Self {
            path,
            io: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Map<String, Value>, StorageError> {
        if !fs::try_exists(&self.path).await? {
            return Ok(Map::new());
        }
        let raw = fs::read_to_string(&self.path).await?;
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StorageError::Serialization {
                key: "*".to_string(),
                reason: format!("{} does not contain a JSON object", self.path.display()),
            }),
            Err(e) => Err(StorageError::Serialization {
                key: "*".to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn persist(&self, map: &Map<String, Value>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let body = serde_json::to_vec_pretty(map).map_err(|e| StorageError::Serialization {
            key: "*".to_string(),
            reason: e.to_string(),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), keys = map.len(), "Storage flushed");
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let _io = self.io.lock().await;
        Ok(self.load().await?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let _io = self.io.lock().await;
        let mut map = self.load().await?;
        map.insert(key.to_string(), value);
        self.persist(&map).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _io = self.io.lock().await;
        let mut map = self.load().await?;
        if map.remove(key).is_some() {
            self.persist(&map).await?;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let _io = self.io.lock().await;
        self.persist(&Map::new()).await
    }
}
