//! Persistence layer: a shared handle over a pluggable key-value backend.

pub mod file;
pub mod memory;
pub mod traits;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use traits::StorageAdapter;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::StorageError;

/// Well-known storage keys. Each component owns the keys it writes.
pub mod keys {
    pub const SETTINGS: &str = "settings";
    pub const PAGE_MEMORY: &str = "page_memory";
    pub const CHAT_HISTORY: &str = "chatHistory";
    pub const READING_HISTORY: &str = "readingHistory";
    pub const READING_STATS: &str = "readingStats";
}

/// Cloneable storage handle: the backend plus an in-process lock per key.
///
/// The backend has no compare-and-swap, so every read-modify-write of a key
/// must hold that key's lock for its whole duration.
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn StorageAdapter>,
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl Storage {
    pub fn new(backend: Arc<dyn StorageAdapter>) -> Self {
        Self {
            backend,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Convenience constructor for an in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    pub fn backend(&self) -> &Arc<dyn StorageAdapter> {
        &self.backend
    }

    /// Acquire the exclusive lock for `key`. Held across the caller's
    /// read-modify-write; released on drop.
    pub async fn lock_key(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(
                locks
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    /// Read and decode the value under `key`.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.backend.get(key).await? {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StorageError::Serialization {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    /// Encode and store `value` under `key`.
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let encoded = serde_json::to_value(value).map_err(|e| StorageError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.backend.set(key, encoded).await
    }

    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.backend.remove(key).await
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        self.backend.clear().await
    }

    /// Serialized read-modify-write of a typed value. `f` receives the
    /// current value (`None` if unset) and returns the value to store.
    pub async fn update_json<T, F>(&self, key: &str, f: F) -> Result<T, StorageError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> T,
    {
        let _guard = self.lock_key(key).await;
        let current = self.get_json::<T>(key).await?;
        let next = f(current);
        self.set_json(key, &next).await?;
        Ok(next)
    }
}
