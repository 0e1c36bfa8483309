//! Key-value store trait definition.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use inkpad_common::Result;

/// How a backend executes its operations underneath the async interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Small, fast store whose operations complete immediately.
    Synchronous,
    /// Larger store backed by real I/O.
    Asynchronous,
}

/// Key-value store trait for different backends.
///
/// Every backend presents the same async interface so callers stay
/// backend-agnostic. Writes are last-write-wins per key; there is no
/// atomicity across keys.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the backend name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Whether the backend is synchronous or I/O backed.
    fn kind(&self) -> BackendKind;

    /// Read the value stored at `key`.
    ///
    /// # Errors
    /// - `StorageUnavailable` if the backend cannot be accessed
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` at `key`, replacing any previous value.
    ///
    /// # Postconditions
    /// - On error the previous value is untouched
    ///
    /// # Errors
    /// - `StorageQuota` if the backend is out of space
    /// - `StorageUnavailable` if the backend cannot be accessed
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every key held by this backend.
    async fn clear(&self) -> Result<()>;

    /// List keys starting with `prefix`, in ascending order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Read and decode a JSON value.
pub async fn get_json<T, S>(store: &S, key: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
    S: KeyValueStore + ?Sized,
{
    match store.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Encode and write a JSON value.
pub async fn set_json<T, S>(store: &S, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
    S: KeyValueStore + ?Sized,
{
    let bytes = serde_json::to_vec(value)?;
    store.set(key, bytes).await
}
