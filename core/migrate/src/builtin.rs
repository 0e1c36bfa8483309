//! Schema migrations shipped with Inkpad.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::migration::Migration;
use inkpad_common::{Record, Result};
use inkpad_storage::keys::{COLLECTIONS, RECORD_PREFIX, TAGS_COLLECTION};
use inkpad_storage::{get_json, set_json, KeyValueStore};

/// v1: create the notes, tags and conflicts collections as empty arrays.
pub struct CreateCollections;

#[async_trait]
impl Migration for CreateCollections {
    fn version(&self) -> u32 {
        1
    }

    fn name(&self) -> &str {
        "create_collections"
    }

    fn description(&self) -> &str {
        "Create the initial notes, tags and conflicts collections"
    }

    async fn up(&self, store: &dyn KeyValueStore) -> Result<()> {
        for key in COLLECTIONS {
            if store.get(key).await?.is_none() {
                set_json(store, key, &Vec::<String>::new()).await?;
                debug!("Created collection {}", key);
            }
        }
        Ok(())
    }

    async fn down(&self, store: &dyn KeyValueStore) -> Result<()> {
        for key in COLLECTIONS {
            store.remove(key).await?;
        }
        Ok(())
    }
}

/// v2: re-normalize stored tags and rebuild the tags collection.
pub struct NormalizeTags;

#[async_trait]
impl Migration for NormalizeTags {
    fn version(&self) -> u32 {
        2
    }

    fn name(&self) -> &str {
        "normalize_tags"
    }

    fn description(&self) -> &str {
        "Lowercase and deduplicate record tags, then rebuild the tag index"
    }

    async fn up(&self, store: &dyn KeyValueStore) -> Result<()> {
        let mut all_tags = BTreeSet::new();
        let mut rewritten = 0usize;

        for key in store.list(RECORD_PREFIX).await? {
            let Some(mut record) = get_json::<Record, _>(store, &key).await? else {
                continue;
            };
            if record.renormalize_tags() {
                set_json(store, &key, &record).await?;
                rewritten += 1;
            }
            all_tags.extend(record.tags().iter().cloned());
        }

        let tags: Vec<String> = all_tags.into_iter().collect();
        set_json(store, TAGS_COLLECTION, &tags).await?;
        debug!("Normalized tags on {} records ({} distinct tags)", rewritten, tags.len());
        Ok(())
    }

    /// Normalization is lossy; there is nothing to restore.
    async fn down(&self, _store: &dyn KeyValueStore) -> Result<()> {
        Ok(())
    }
}

/// Every built-in migration, ascending.
pub fn builtin_migrations() -> Vec<Arc<dyn Migration>> {
    vec![Arc::new(CreateCollections), Arc::new(NormalizeTags)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::MigrationManager;
    use inkpad_storage::keys::{record_key, CONFLICTS_COLLECTION, LEDGER_KEY, NOTES_COLLECTION};
    use inkpad_storage::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_v1_on_empty_store_creates_collections_and_ledger() {
        let store = Arc::new(MemoryStore::new());
        let mut manager = MigrationManager::new(store.clone());
        manager.register(CreateCollections).unwrap();

        assert_eq!(manager.migrate().await.unwrap(), vec![1]);

        let mut keys = store.list("").await.unwrap();
        keys.retain(|key| key != LEDGER_KEY);
        let mut expected: Vec<String> = COLLECTIONS.iter().map(|k| k.to_string()).collect();
        expected.sort();
        assert_eq!(keys, expected);
        for key in COLLECTIONS {
            assert_eq!(store.get(key).await.unwrap().unwrap(), b"[]".to_vec());
        }

        let raw = store.get(LEDGER_KEY).await.unwrap().unwrap();
        let ledger: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(ledger["currentVersion"], 1);
        assert_eq!(ledger["appliedMigrations"], serde_json::json!([1]));
    }

    #[tokio::test]
    async fn test_create_collections_keeps_existing_data() {
        let store = MemoryStore::new();
        store
            .set(NOTES_COLLECTION, br#"["kept"]"#.to_vec())
            .await
            .unwrap();

        CreateCollections.up(&store).await.unwrap();

        assert_eq!(
            store.get(NOTES_COLLECTION).await.unwrap(),
            Some(br#"["kept"]"#.to_vec())
        );
        assert_eq!(store.get(TAGS_COLLECTION).await.unwrap(), Some(b"[]".to_vec()));
        assert_eq!(
            store.get(CONFLICTS_COLLECTION).await.unwrap(),
            Some(b"[]".to_vec())
        );

        CreateCollections.down(&store).await.unwrap();
        assert!(store.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_normalize_tags_rewrites_legacy_records() {
        let store = MemoryStore::new();
        let legacy = br#"{"id":"n1","title":"t","body":"b","tags":[" Work","work","Home"],
            "createdAt":"2024-01-01T00:00:00Z","updatedAt":"2024-01-02T00:00:00Z"}"#;
        store.set("inkpad:note:n1", legacy.to_vec()).await.unwrap();

        let clean = Record::new("clean", "").with_tags(["alpha"]);
        set_json(&store, &record_key(clean.id()), &clean).await.unwrap();

        NormalizeTags.up(&store).await.unwrap();

        let fixed: Record = get_json(&store, "inkpad:note:n1").await.unwrap().unwrap();
        assert_eq!(fixed.tags(), ["work", "home"]);
        assert!(fixed.validate().is_ok());
        assert_eq!(fixed.updated_at().to_rfc3339(), "2024-01-02T00:00:00+00:00");

        let tags: Vec<String> = get_json(&store, TAGS_COLLECTION).await.unwrap().unwrap();
        assert_eq!(tags, vec!["alpha", "home", "work"]);
    }

    #[test]
    fn test_builtin_versions() {
        let versions: Vec<u32> = builtin_migrations().iter().map(|m| m.version()).collect();
        assert_eq!(versions, vec![1, 2]);
    }
}
