//! Inkpad Sync Engine
//!
//! This module reconciles local records against remote snapshots:
//! - Divergence classification against the last common sync point
//! - Conflict artifacts resolved by the caller, never automatically
//! - Sync sessions over a pluggable remote source
//! - Retry strategy with exponential backoff

pub mod conflict;
pub mod engine;
pub mod remote;
pub mod retry;
pub mod session;
pub mod state;

// Re-export main types
pub use conflict::{classify, ConflictResolver, ConflictState, Divergence, Resolution, SyncConflict};
pub use engine::{ReconcileOutcome, SyncConfig, SyncEngine};
pub use remote::StoreRemote;
pub use retry::{retry, retry_with_config, RetryConfig, RetryExecutor};
pub use session::{RemoteSource, SyncReport, SyncSession};
pub use state::{SyncEntry, SyncStatus};
