//! Typed record repository over any key-value store.
//!
//! # Invariants
//! - A record is written before its id enters the notes collection and
//!   removed before its id leaves it, so the collection never names a
//!   record that does not exist.
//! - Records are validated before any write.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::keys::{self, NOTES_COLLECTION, RECORD_PREFIX, TAGS_COLLECTION};
use crate::provider::{get_json, set_json, KeyValueStore};
use inkpad_common::{Error, Record, RecordId, Result};

/// Repository of note records.
#[derive(Clone)]
pub struct RecordStore {
    store: Arc<dyn KeyValueStore>,
}

impl RecordStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Validate and persist a record, then index it.
    ///
    /// # Errors
    /// - `Validation` if the record is malformed
    /// - `StorageQuota` if the backend is full; the previous value survives,
    ///   including when only an index write was rejected
    pub async fn save_record(&self, record: &Record) -> Result<()> {
        record.validate()?;
        let key = keys::record_key(record.id());
        let prior = self.store.get(&key).await?;
        set_json(self.store.as_ref(), &key, record).await?;

        if let Err(err) = self.index(record).await {
            self.restore(record.id(), &key, prior).await;
            return Err(err);
        }

        debug!("Saved record {}", record.id());
        Ok(())
    }

    /// Fetch a record; `None` if absent.
    pub async fn get_record(&self, id: &RecordId) -> Result<Option<Record>> {
        get_json(self.store.as_ref(), &keys::record_key(id)).await
    }

    /// Fetch a record that must exist.
    ///
    /// # Errors
    /// - `NotFound` if the id is absent
    pub async fn require_record(&self, id: &RecordId) -> Result<Record> {
        self.get_record(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Record not found: {}", id)))
    }

    /// Delete a record and drop it from the notes collection.
    ///
    /// # Errors
    /// - `NotFound` if the id is absent
    pub async fn delete_record(&self, id: &RecordId) -> Result<()> {
        let key = keys::record_key(id);
        if self.store.get(&key).await?.is_none() {
            return Err(Error::NotFound(format!("Record not found: {}", id)));
        }
        self.store.remove(&key).await?;
        self.unindex(id).await
    }

    /// Ids in the notes collection, in creation order.
    pub async fn list_ids(&self) -> Result<Vec<RecordId>> {
        Ok(get_json(self.store.as_ref(), NOTES_COLLECTION)
            .await?
            .unwrap_or_default())
    }

    /// Every stored record: indexed ones first, then unindexed ones by key.
    pub async fn list_records(&self) -> Result<Vec<Record>> {
        let indexed = self.list_ids().await?;
        let mut records = Vec::with_capacity(indexed.len());

        for id in &indexed {
            if let Some(record) = self.get_record(id).await? {
                records.push(record);
            }
        }

        for key in self.store.list(RECORD_PREFIX).await? {
            let raw_id = &key[RECORD_PREFIX.len()..];
            if indexed.iter().any(|id| id.as_str() == raw_id) {
                continue;
            }
            if let Some(record) = get_json::<Record, _>(self.store.as_ref(), &key).await? {
                records.push(record);
            }
        }

        Ok(records)
    }

    /// Every tag known to the store, sorted.
    pub async fn known_tags(&self) -> Result<Vec<String>> {
        Ok(get_json(self.store.as_ref(), TAGS_COLLECTION)
            .await?
            .unwrap_or_default())
    }

    /// Replace the tag collection with exactly `tags`.
    pub async fn replace_tags(&self, mut tags: Vec<String>) -> Result<()> {
        tags.sort();
        tags.dedup();
        set_json(self.store.as_ref(), TAGS_COLLECTION, &tags).await
    }

    async fn index(&self, record: &Record) -> Result<()> {
        let mut ids = self.list_ids().await?;
        if !ids.contains(record.id()) {
            ids.push(record.id().clone());
            set_json(self.store.as_ref(), NOTES_COLLECTION, &ids).await?;
        }
        self.merge_tags(record.tags()).await
    }

    /// Put back the bytes `key` held before a failed save.
    async fn restore(&self, id: &RecordId, key: &str, prior: Option<Vec<u8>>) {
        let restored = match prior {
            Some(bytes) => self.store.set(key, bytes).await,
            None => match self.unindex(id).await {
                Ok(()) => self.store.remove(key).await,
                Err(err) => Err(err),
            },
        };
        if let Err(err) = restored {
            warn!("Failed to roll back record {}: {}", id, err);
        }
    }

    async fn unindex(&self, id: &RecordId) -> Result<()> {
        let mut ids = self.list_ids().await?;
        let before = ids.len();
        ids.retain(|existing| existing != id);
        if ids.len() != before {
            set_json(self.store.as_ref(), NOTES_COLLECTION, &ids).await?;
        }
        Ok(())
    }

    async fn merge_tags(&self, new_tags: &[String]) -> Result<()> {
        let mut tags = self.known_tags().await?;
        let missing: Vec<&String> = new_tags.iter().filter(|t| !tags.contains(*t)).collect();
        if missing.is_empty() {
            return Ok(());
        }
        tags.extend(missing.into_iter().cloned());
        self.replace_tags(tags).await
    }
}
