//! Persisted record of applied migrations.
//!
//! # Invariants
//! - `current_version == max(applied_migrations)`, or 0 when empty.
//! - A version is only added after its `up` succeeded and only removed
//!   after its `down` succeeded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

use inkpad_common::Result;
use inkpad_storage::{get_json, keys::LEDGER_KEY, set_json, KeyValueStore};

/// The schema-version ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationLedger {
    current_version: u32,
    applied_migrations: BTreeSet<u32>,
    last_migrated_at: Option<DateTime<Utc>>,
}

impl MigrationLedger {
    /// Load the ledger, or an empty one if none is stored.
    ///
    /// A stored ledger whose `currentVersion` disagrees with its applied set
    /// is repaired in memory.
    pub async fn load(store: &dyn KeyValueStore) -> Result<Self> {
        let mut ledger: Self = get_json(store, LEDGER_KEY).await?.unwrap_or_default();
        let expected = ledger.max_applied();
        if ledger.current_version != expected {
            warn!(
                "Ledger currentVersion {} disagrees with applied set (max {}); repairing",
                ledger.current_version, expected
            );
            ledger.current_version = expected;
        }
        Ok(ledger)
    }

    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        set_json(store, LEDGER_KEY, self).await
    }

    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    pub fn applied(&self) -> Vec<u32> {
        self.applied_migrations.iter().copied().collect()
    }

    pub fn is_applied(&self, version: u32) -> bool {
        self.applied_migrations.contains(&version)
    }

    pub fn last_migrated_at(&self) -> Option<DateTime<Utc>> {
        self.last_migrated_at
    }

    pub(crate) fn mark_applied(&mut self, version: u32, at: DateTime<Utc>) {
        self.applied_migrations.insert(version);
        self.current_version = self.max_applied();
        self.last_migrated_at = Some(at);
    }

    pub(crate) fn mark_rolled_back(&mut self, version: u32, at: DateTime<Utc>) {
        self.applied_migrations.remove(&version);
        self.current_version = self.max_applied();
        self.last_migrated_at = Some(at);
    }

    fn max_applied(&self) -> u32 {
        self.applied_migrations.iter().next_back().copied().unwrap_or(0)
    }
}
