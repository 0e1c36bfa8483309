//! Common utilities and types shared across Inkpad crates.
//!
//! This crate provides the error taxonomy and the record model used by the
//! storage, migration and sync layers.

pub mod error;
pub mod record;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use record::{normalize_tag, normalize_tags, Record};
pub use types::RecordId;
