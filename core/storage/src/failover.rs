//! Primary/secondary failover wrapper.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use crate::provider::{BackendKind, KeyValueStore};
use inkpad_common::{Error, Result};

/// Routes operations to a primary store and, when the primary reports
/// `StorageUnavailable`, to the configured secondary.
///
/// Only availability failures trigger failover. Quota errors and everything
/// else surface unchanged. There is never a third backend.
pub struct FailoverStore {
    primary: Arc<dyn KeyValueStore>,
    secondary: Option<Arc<dyn KeyValueStore>>,
}

impl FailoverStore {
    pub fn new(primary: Arc<dyn KeyValueStore>) -> Self {
        Self {
            primary,
            secondary: None,
        }
    }

    pub fn with_secondary(mut self, secondary: Arc<dyn KeyValueStore>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn primary(&self) -> &Arc<dyn KeyValueStore> {
        &self.primary
    }

    pub fn secondary(&self) -> Option<&Arc<dyn KeyValueStore>> {
        self.secondary.as_ref()
    }

    async fn route<'a, T, F, Fut>(&'a self, op: &str, call: F) -> Result<T>
    where
        F: Fn(&'a dyn KeyValueStore) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match call(self.primary.as_ref()).await {
            Err(err @ Error::StorageUnavailable { .. }) => match &self.secondary {
                Some(secondary) => {
                    warn!(
                        "{} on '{}' failed ({}); failing over to '{}'",
                        op,
                        self.primary.name(),
                        err,
                        secondary.name()
                    );
                    call(secondary.as_ref()).await
                }
                None => Err(err),
            },
            other => other,
        }
    }
}

#[async_trait]
impl KeyValueStore for FailoverStore {
    fn name(&self) -> &str {
        "failover"
    }

    fn kind(&self) -> BackendKind {
        self.primary.kind()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.route("get", |store| store.get(key)).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.route("set", |store| store.set(key, value.clone()))
            .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.route("remove", |store| store.remove(key)).await
    }

    async fn clear(&self) -> Result<()> {
        self.route("clear", |store| store.clear()).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.route("list", |store| store.list(prefix)).await
    }
}
