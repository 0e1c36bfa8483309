//! In-memory key-value store.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::provider::{BackendKind, KeyValueStore};
use inkpad_common::{Error, Result};

/// In-memory store, the fast synchronous backend.
///
/// Behaves like browser `localStorage`: small, synchronous, and optionally
/// capped by a byte quota counted as key plus value length. It can also be
/// switched off to model a context where the backend is disabled.
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    quota_bytes: Option<usize>,
    available: AtomicBool,
}

impl MemoryStore {
    /// Create a new empty store without a quota.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            quota_bytes: None,
            available: AtomicBool::new(true),
        }
    }

    /// Create a store that rejects writes beyond `quota_bytes`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::new()
        }
    }

    /// Toggle availability. While unavailable every operation fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Bytes currently used (keys plus values).
    pub fn used_bytes(&self) -> Result<usize> {
        let entries = self.read()?;
        Ok(entries.iter().map(|(k, v)| k.len() + v.len()).sum())
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::StorageUnavailable {
                backend: self.name().to_string(),
                reason: "store disabled in this context".to_string(),
            })
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.entries
            .read()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.entries
            .write()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Synchronous
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_available()?;
        Ok(self.read()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.ensure_available()?;
        let mut entries = self.write()?;

        if let Some(quota) = self.quota_bytes {
            let used: usize = entries.iter().map(|(k, v)| k.len() + v.len()).sum();
            let replaced = entries.get(key).map_or(0, |old| key.len() + old.len());
            let projected = used - replaced + key.len() + value.len();
            if projected > quota {
                return Err(Error::StorageQuota {
                    backend: self.name().to_string(),
                    key: key.to_string(),
                });
            }
        }

        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.ensure_available()?;
        self.write()?.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_available()?;
        self.write()?.clear();
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.ensure_available()?;
        let entries = self.read()?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}
