//! Application handle wiring storage, migrations and sync together.

use std::sync::Arc;
use tracing::info;

use crate::config::{AppConfig, StorageConfig};
use inkpad_common::Result;
use inkpad_migrate::{builtin_migrations, MigrationManager};
use inkpad_storage::{
    create_default_registry, FailoverStore, KeyValueStore, RecordStore, StoreRegistry,
};
use inkpad_sync::{RemoteSource, RetryExecutor, SyncEngine, SyncSession};

/// An open, fully migrated Inkpad store.
pub struct Inkpad {
    config: AppConfig,
    store: Arc<dyn KeyValueStore>,
    records: RecordStore,
    engine: Arc<SyncEngine>,
}

impl Inkpad {
    /// Open the configured store and bring its schema up to date.
    ///
    /// # Errors
    /// - `NotFound` if a backend kind is not registered
    /// - `Migration` if a built-in migration fails; the store is not usable
    pub async fn open(config: AppConfig) -> Result<Self> {
        let registry = create_default_registry()?;
        Self::open_with_registry(config, &registry).await
    }

    /// Open using a caller-supplied registry.
    pub async fn open_with_registry(config: AppConfig, registry: &StoreRegistry) -> Result<Self> {
        let store = build_store(&config.storage, registry)?;

        let mut migrations = migration_manager(store.clone())?;
        let applied = migrations.migrate().await?;
        if !applied.is_empty() {
            info!("Applied migrations {:?}", applied);
        }

        let records = RecordStore::new(store.clone());
        let engine = Arc::new(SyncEngine::new(records.clone(), config.sync.clone()));
        if config.sync.queue_conflicts {
            engine.restore_queued().await?;
        }

        info!("Opened Inkpad store on '{}'", store.name());
        Ok(Self {
            config,
            store,
            records,
            engine,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Retry executor built from the configured retry settings.
    pub fn retry_executor(&self) -> RetryExecutor {
        RetryExecutor::new(self.config.retry.to_retry_config())
    }

    /// A sync session against `remote`.
    pub fn session(&self, remote: Arc<dyn RemoteSource>) -> SyncSession {
        SyncSession::new(self.engine.clone(), remote, self.retry_executor())
    }

    /// Migration manager over this store, loaded with the built-ins.
    pub fn migrations(&self) -> Result<MigrationManager> {
        migration_manager(self.store.clone())
    }
}

/// Build the configured store, wrapping it for failover when a secondary is
/// present.
pub fn build_store(
    config: &StorageConfig,
    registry: &StoreRegistry,
) -> Result<Arc<dyn KeyValueStore>> {
    let primary = registry.resolve(&config.primary.kind, &config.primary.options)?;
    match &config.secondary {
        None => Ok(primary),
        Some(secondary) => {
            let secondary = registry.resolve(&secondary.kind, &secondary.options)?;
            Ok(Arc::new(FailoverStore::new(primary).with_secondary(secondary)))
        }
    }
}

/// A migration manager with every built-in migration registered.
pub fn migration_manager(store: Arc<dyn KeyValueStore>) -> Result<MigrationManager> {
    let mut manager = MigrationManager::new(store);
    manager.register_all(builtin_migrations())?;
    Ok(manager)
}
