//! Per-record sync bookkeeping and persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use inkpad_common::{RecordId, Result};
use inkpad_storage::{get_json, keys, set_json, KeyValueStore};

/// Sync status for a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local and remote agree as of `last_synced_at`.
    Synced,
    /// A conflict is waiting for a resolution.
    Conflicted,
}

/// Sync bookkeeping for one record id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEntry {
    pub id: RecordId,
    /// Last common sync point; `None` if the pair never synced.
    pub last_synced_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
}

impl SyncEntry {
    /// Entry for a record that has never synced.
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            last_synced_at: None,
            status: SyncStatus::Synced,
        }
    }

    /// Load the entry for `id`, or a fresh one.
    pub async fn load(store: &dyn KeyValueStore, id: &RecordId) -> Result<Self> {
        Ok(get_json(store, &keys::sync_key(id))
            .await?
            .unwrap_or_else(|| Self::new(id.clone())))
    }

    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        set_json(store, &keys::sync_key(&self.id), self).await
    }

    /// Record a common sync point.
    pub fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.last_synced_at = Some(at);
        self.status = SyncStatus::Synced;
    }

    /// Flag an unresolved conflict; the sync point is kept.
    pub fn mark_conflicted(&mut self) {
        self.status = SyncStatus::Conflicted;
    }

    /// Drop the conflict flag without moving the sync point.
    pub fn clear_conflict(&mut self) {
        self.status = SyncStatus::Synced;
    }

    pub fn is_conflicted(&self) -> bool {
        self.status == SyncStatus::Conflicted
    }
}
