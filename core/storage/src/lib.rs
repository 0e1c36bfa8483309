//! Storage abstraction for Inkpad.
//!
//! This module provides a trait-based interface over key-value backends
//! (an in-memory store, a local filesystem store) plus a failover wrapper,
//! a store registry, and the typed record repository.
//!
//! # Design Principles
//! - Backend isolation: callers only see [`KeyValueStore`]
//! - Async operations: every backend presents the same async interface
//! - Unified error semantics: quota and availability failures are distinct
//! - No cross-key atomicity: multi-key invariants are ordered by callers

pub mod failover;
pub mod keys;
pub mod local;
pub mod memory;
pub mod provider;
pub mod records;
pub mod registry;

pub use failover::FailoverStore;
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use provider::{get_json, set_json, BackendKind, KeyValueStore};
pub use records::RecordStore;
pub use registry::{create_default_registry, StoreFactory, StoreRegistry};
