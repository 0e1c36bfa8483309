//! Migration trait and closure-backed migrations.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;

use inkpad_common::Result;
use inkpad_storage::KeyValueStore;

/// A named, versioned unit of schema change.
///
/// `up` must be idempotent: applying it to an already-migrated store is a
/// no-op. `down` reverses `up` and only runs on explicit rollback.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Unique, positive schema version.
    fn version(&self) -> u32;

    /// Short machine-friendly name.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str {
        ""
    }

    async fn up(&self, store: &dyn KeyValueStore) -> Result<()>;

    async fn down(&self, store: &dyn KeyValueStore) -> Result<()>;
}

/// Summary of a registered migration, as reported by `status()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationInfo {
    pub version: u32,
    pub name: String,
    pub description: String,
}

impl MigrationInfo {
    pub fn of(migration: &dyn Migration) -> Self {
        Self {
            version: migration.version(),
            name: migration.name().to_string(),
            description: migration.description().to_string(),
        }
    }
}

type StepFn = Box<dyn for<'a> Fn(&'a dyn KeyValueStore) -> BoxFuture<'a, Result<()>> + Send + Sync>;

/// A migration assembled from two closures.
pub struct FnMigration {
    version: u32,
    name: String,
    description: String,
    up: StepFn,
    down: StepFn,
}

impl FnMigration {
    pub fn new<U, D>(version: u32, name: impl Into<String>, up: U, down: D) -> Self
    where
        U: for<'a> Fn(&'a dyn KeyValueStore) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
        D: for<'a> Fn(&'a dyn KeyValueStore) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        Self {
            version,
            name: name.into(),
            description: String::new(),
            up: Box::new(up),
            down: Box::new(down),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl Migration for FnMigration {
    fn version(&self) -> u32 {
        self.version
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn up(&self, store: &dyn KeyValueStore) -> Result<()> {
        (self.up)(store).await
    }

    async fn down(&self, store: &dyn KeyValueStore) -> Result<()> {
        (self.down)(store).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkpad_storage::MemoryStore;

    #[tokio::test]
    async fn test_fn_migration_runs_closures() {
        let migration = FnMigration::new(
            7,
            "seed_flag",
            |store| Box::pin(async move { store.set("flag", b"on".to_vec()).await }),
            |store| Box::pin(async move { store.remove("flag").await }),
        )
        .with_description("Seeds a feature flag");

        let store = MemoryStore::new();
        migration.up(&store).await.unwrap();
        assert_eq!(store.get("flag").await.unwrap(), Some(b"on".to_vec()));

        migration.down(&store).await.unwrap();
        assert_eq!(store.get("flag").await.unwrap(), None);

        let info = MigrationInfo::of(&migration);
        assert_eq!(info.version, 7);
        assert_eq!(info.name, "seed_flag");
        assert_eq!(info.description, "Seeds a feature flag");
    }
}
