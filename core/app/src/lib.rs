//! Inkpad application layer.
//!
//! Opens the configured store, runs migrations as a startup gate, and hands
//! out the record repository and sync engine.

pub mod app;
pub mod config;

pub use app::{build_store, migration_manager, Inkpad};
pub use config::{
    default_config_path, default_data_dir, AppConfig, BackendConfig, RetrySettings, StorageConfig,
    CONFIG_FILENAME,
};
