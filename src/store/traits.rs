//! `StorageAdapter` trait, the durable key-value map every component persists through.
//!
//! Values are JSON documents. Each component owns a disjoint set of keys; there
//! is no cross-key transactionality.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;

/// Backend-agnostic async key-value storage.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Read the value stored under `key`, `None` if the key was never set.
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    /// Delete `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Delete every key.
    async fn clear(&self) -> Result<(), StorageError>;
}
