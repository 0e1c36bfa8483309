//! A remote source backed by another record store.
//!
//! Two devices sharing a folder each open a [`LocalStore`] on it and sync
//! through this adapter.
//!
//! [`LocalStore`]: inkpad_storage::LocalStore

use async_trait::async_trait;

use inkpad_common::{Record, RecordId, Result};
use inkpad_storage::RecordStore;

use crate::session::RemoteSource;

pub struct StoreRemote {
    records: RecordStore,
}

impl StoreRemote {
    pub fn new(records: RecordStore) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }
}

#[async_trait]
impl RemoteSource for StoreRemote {
    fn name(&self) -> &str {
        self.records.store().name()
    }

    async fn fetch_all(&self) -> Result<Vec<Record>> {
        self.records.list_records().await
    }

    async fn fetch(&self, id: &RecordId) -> Result<Option<Record>> {
        self.records.get_record(id).await
    }

    async fn push(&self, record: &Record) -> Result<()> {
        self.records.save_record(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkpad_storage::LocalStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_shared_folder_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(temp.path()).unwrap());
        let remote = StoreRemote::new(RecordStore::new(store));

        let record = Record::new("shared", "folder").with_tags(["sync"]);
        remote.push(&record).await.unwrap();

        assert_eq!(remote.name(), "local");
        assert_eq!(remote.fetch(record.id()).await.unwrap(), Some(record.clone()));
        assert_eq!(remote.fetch_all().await.unwrap(), vec![record]);
        assert!(remote.fetch(&RecordId::generate()).await.unwrap().is_none());
    }
}
