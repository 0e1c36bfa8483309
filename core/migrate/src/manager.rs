//! Migration registry and executor.
//!
//! # Responsibility
//! - Register migrations under unique versions.
//! - Apply pending migrations in ascending version order, one at a time.
//! - Roll back a single applied migration on request.
//!
//! # Invariants
//! - The ledger is saved after every successful `up`; a failing migration
//!   never enters it.
//! - Rollback touches the ledger only after `down` succeeded.
//! - `migrate` and `rollback` take `&mut self`, so one manager can never run
//!   two of them concurrently.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ledger::MigrationLedger;
use crate::migration::{Migration, MigrationInfo};
use inkpad_common::{Error, Result};
use inkpad_storage::KeyValueStore;

/// Snapshot of the schema state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub current_version: u32,
    pub applied_versions: Vec<u32>,
    pub pending: Vec<MigrationInfo>,
    pub last_migrated_at: Option<DateTime<Utc>>,
}

/// Applies and rolls back registered migrations against one store.
pub struct MigrationManager {
    store: Arc<dyn KeyValueStore>,
    migrations: BTreeMap<u32, Arc<dyn Migration>>,
}

impl MigrationManager {
    /// Create a manager with no registered migrations.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            migrations: BTreeMap::new(),
        }
    }

    /// Register a migration.
    ///
    /// # Errors
    /// - `InvalidInput` if the version is 0
    /// - `AlreadyExists` if the version is already registered
    pub fn register(&mut self, migration: impl Migration + 'static) -> Result<()> {
        self.register_arc(Arc::new(migration))
    }

    /// Register a shared migration.
    pub fn register_arc(&mut self, migration: Arc<dyn Migration>) -> Result<()> {
        let version = migration.version();
        if version == 0 {
            return Err(Error::InvalidInput(format!(
                "Migration '{}' uses reserved version 0",
                migration.name()
            )));
        }
        if let Some(existing) = self.migrations.get(&version) {
            return Err(Error::AlreadyExists(format!(
                "Migration version {} is already registered as '{}'",
                version,
                existing.name()
            )));
        }
        debug!("Registered migration {} ({})", version, migration.name());
        self.migrations.insert(version, migration);
        Ok(())
    }

    /// Register several migrations, stopping at the first failure.
    pub fn register_all(
        &mut self,
        migrations: impl IntoIterator<Item = Arc<dyn Migration>>,
    ) -> Result<()> {
        for migration in migrations {
            self.register_arc(migration)?;
        }
        Ok(())
    }

    /// Registered versions, ascending.
    pub fn registered_versions(&self) -> Vec<u32> {
        self.migrations.keys().copied().collect()
    }

    /// Highest registered version, or 0.
    pub fn latest_version(&self) -> u32 {
        self.migrations.keys().next_back().copied().unwrap_or(0)
    }

    /// Load the persisted ledger.
    pub async fn ledger(&self) -> Result<MigrationLedger> {
        MigrationLedger::load(self.store.as_ref()).await
    }

    /// Current version, applied versions, pending migrations and timestamp.
    pub async fn status(&self) -> Result<MigrationStatus> {
        let ledger = self.ledger().await?;
        Ok(MigrationStatus {
            current_version: ledger.current_version(),
            applied_versions: ledger.applied(),
            pending: self.pending_in(&ledger),
            last_migrated_at: ledger.last_migrated_at(),
        })
    }

    /// Whether any registered migration is still pending.
    pub async fn needs_migration(&self) -> Result<bool> {
        let ledger = self.ledger().await?;
        Ok(!self.pending_in(&ledger).is_empty())
    }

    /// Apply every pending migration in ascending order.
    ///
    /// Returns the versions applied by this call.
    ///
    /// # Errors
    /// - `Migration` naming the first failing version; migrations applied
    ///   before it stay committed
    pub async fn migrate(&mut self) -> Result<Vec<u32>> {
        let mut ledger = self.ledger().await?;
        let mut applied = Vec::new();

        let unknown: Vec<u32> = ledger
            .applied()
            .into_iter()
            .filter(|v| !self.migrations.contains_key(v))
            .collect();
        if !unknown.is_empty() {
            warn!("Ledger lists unregistered migrations: {:?}", unknown);
        }

        for (version, migration) in &self.migrations {
            if ledger.is_applied(*version) {
                continue;
            }

            info!("Applying migration {} ({})", version, migration.name());
            migration
                .up(self.store.as_ref())
                .await
                .map_err(|source| failure(migration.as_ref(), source))?;

            ledger.mark_applied(*version, Utc::now());
            ledger
                .save(self.store.as_ref())
                .await
                .map_err(|source| failure(migration.as_ref(), source))?;
            applied.push(*version);
        }

        if applied.is_empty() {
            debug!("Schema already at version {}", ledger.current_version());
        } else {
            info!(
                "Migrated schema to version {} (applied {:?})",
                ledger.current_version(),
                applied
            );
        }
        Ok(applied)
    }

    /// Roll back one applied migration.
    ///
    /// # Errors
    /// - `NotFound` if the version is not registered
    /// - `InvalidInput` if the version is not applied
    /// - `Migration` if `down` fails; the ledger is left unchanged
    pub async fn rollback(&mut self, version: u32) -> Result<()> {
        let migration = self
            .migrations
            .get(&version)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Migration {} is not registered", version)))?;

        let mut ledger = self.ledger().await?;
        if !ledger.is_applied(version) {
            return Err(Error::InvalidInput(format!(
                "Migration {} ({}) is not applied",
                version,
                migration.name()
            )));
        }

        info!("Rolling back migration {} ({})", version, migration.name());
        migration
            .down(self.store.as_ref())
            .await
            .map_err(|source| failure(migration.as_ref(), source))?;

        ledger.mark_rolled_back(version, Utc::now());
        ledger
            .save(self.store.as_ref())
            .await
            .map_err(|source| failure(migration.as_ref(), source))?;

        info!("Schema now at version {}", ledger.current_version());
        Ok(())
    }

    fn pending_in(&self, ledger: &MigrationLedger) -> Vec<MigrationInfo> {
        self.migrations
            .values()
            .filter(|m| !ledger.is_applied(m.version()))
            .map(|m| MigrationInfo::of(m.as_ref()))
            .collect()
    }
}

fn failure(migration: &dyn Migration, source: Error) -> Error {
    Error::Migration {
        version: migration.version(),
        name: migration.name().to_string(),
        source: Box::new(source),
    }
}
