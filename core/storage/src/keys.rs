//! Persisted key layout.
//!
//! Record keys, the schema ledger and per-record sync bookkeeping live in
//! disjoint namespaces.

use inkpad_common::RecordId;

/// Schema-version ledger owned by the migration manager.
pub const LEDGER_KEY: &str = "inkpad:schema";

/// Prefix of record keys.
pub const RECORD_PREFIX: &str = "inkpad:note:";

/// Prefix of per-record sync bookkeeping keys.
pub const SYNC_PREFIX: &str = "inkpad:sync:";

/// Ordered list of record ids, in creation order.
pub const NOTES_COLLECTION: &str = "inkpad:collection:notes";

/// Sorted list of every tag in use.
pub const TAGS_COLLECTION: &str = "inkpad:collection:tags";

/// Conflicts queued by the host for later resolution.
pub const CONFLICTS_COLLECTION: &str = "inkpad:collection:conflicts";

/// Every collection key created by the initial schema.
pub const COLLECTIONS: [&str; 3] = [NOTES_COLLECTION, TAGS_COLLECTION, CONFLICTS_COLLECTION];

pub fn record_key(id: &RecordId) -> String {
    format!("{}{}", RECORD_PREFIX, id)
}

pub fn sync_key(id: &RecordId) -> String {
    format!("{}{}", SYNC_PREFIX, id)
}
