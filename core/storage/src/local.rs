//! Local filesystem key-value store.

use async_trait::async_trait;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::provider::{BackendKind, KeyValueStore};
use inkpad_common::{Error, Result};

/// Prefix of in-flight temp files. Never produced by key encoding, since
/// `.` is percent-encoded.
const TEMP_PREFIX: &str = ".tmp-";

/// Local filesystem store, the larger asynchronous backend.
///
/// Stores one file per key inside a root directory. Writes land in a temp
/// file first and are renamed into place, so readers never see a truncated
/// value.
pub struct LocalStore {
    root: PathBuf,
    quota_bytes: Option<u64>,
}

impl LocalStore {
    /// Create a new local store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self {
            root,
            quota_bytes: None,
        })
    }

    /// Cap the total size of stored values.
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root
            .join(utf8_percent_encode(key, NON_ALPHANUMERIC).to_string())
    }

    fn decode_name(name: &str) -> Option<String> {
        if name.starts_with(TEMP_PREFIX) {
            return None;
        }
        percent_decode_str(name)
            .decode_utf8()
            .ok()
            .map(|key| key.into_owned())
    }

    fn unavailable(&self, reason: impl Into<String>) -> Error {
        Error::StorageUnavailable {
            backend: self.name().to_string(),
            reason: reason.into(),
        }
    }

    fn map_io(&self, err: std::io::Error, key: &str) -> Error {
        match err.kind() {
            IoErrorKind::StorageFull => Error::StorageQuota {
                backend: self.name().to_string(),
                key: key.to_string(),
            },
            IoErrorKind::PermissionDenied => self.unavailable(err.to_string()),
            _ => Error::Io(err),
        }
    }

    async fn ensure_available(&self) -> Result<()> {
        match fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(self.unavailable(format!(
                "root {} is not a directory",
                self.root.display()
            ))),
            Err(err) => Err(self.unavailable(format!(
                "root {} inaccessible: {}",
                self.root.display(),
                err
            ))),
        }
    }

    /// Names and sizes of every committed entry.
    async fn entries(&self) -> Result<Vec<(String, u64)>> {
        let mut out = Vec::new();
        let mut dir = fs::read_dir(&self.root)
            .await
            .map_err(|e| self.map_io(e, ""))?;

        while let Some(entry) = dir.next_entry().await.map_err(|e| self.map_io(e, ""))? {
            let name = entry.file_name();
            let Some(key) = name.to_str().and_then(Self::decode_name) else {
                continue;
            };
            let meta = entry.metadata().await.map_err(|e| self.map_io(e, &key))?;
            if meta.is_file() {
                out.push((key, meta.len()));
            }
        }

        Ok(out)
    }

    async fn check_quota(&self, key: &str, new_len: u64) -> Result<()> {
        let Some(quota) = self.quota_bytes else {
            return Ok(());
        };
        let used: u64 = self
            .entries()
            .await?
            .into_iter()
            .filter(|(existing, _)| existing != key)
            .map(|(_, len)| len)
            .sum();
        if used + new_len > quota {
            return Err(Error::StorageQuota {
                backend: self.name().to_string(),
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Asynchronous
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_available().await?;
        match fs::read(self.key_path(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.map_io(err, key)),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.ensure_available().await?;
        self.check_quota(key, value.len() as u64).await?;

        let target = self.key_path(key);
        let temp = self.root.join(format!("{}{}", TEMP_PREFIX, Uuid::new_v4()));

        if let Err(err) = fs::write(&temp, &value).await {
            let _ = fs::remove_file(&temp).await;
            return Err(self.map_io(err, key));
        }
        if let Err(err) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(self.map_io(err, key));
        }

        debug!("Wrote {} bytes to {}", value.len(), key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.ensure_available().await?;
        match fs::remove_file(self.key_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.map_io(err, key)),
        }
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_available().await?;
        for (key, _) in self.entries().await? {
            self.remove(&key).await?;
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.ensure_available().await?;
        let mut keys: Vec<String> = self
            .entries()
            .await?
            .into_iter()
            .map(|(key, _)| key)
            .filter(|key| key.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }
}
