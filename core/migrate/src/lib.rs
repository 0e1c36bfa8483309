//! Versioned schema migrations for Inkpad stores.
//!
//! Migrations are registered with a [`MigrationManager`], which applies the
//! pending ones in ascending version order and records each success in a
//! [`MigrationLedger`] persisted in the same store.

pub mod builtin;
pub mod ledger;
pub mod manager;
pub mod migration;

pub use builtin::{builtin_migrations, CreateCollections, NormalizeTags};
pub use ledger::MigrationLedger;
pub use manager::{MigrationManager, MigrationStatus};
pub use migration::{FnMigration, Migration, MigrationInfo};
