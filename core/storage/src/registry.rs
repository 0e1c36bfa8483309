//! Store registry for building backends from configuration.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::KeyValueStore;
use inkpad_common::{Error, Result};

/// Factory function type for creating stores.
pub type StoreFactory = Box<dyn Fn(&Value) -> Result<Arc<dyn KeyValueStore>> + Send + Sync>;

/// Registry of store factories, keyed by backend kind.
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a store factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: StoreFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Store '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Build a store by name and options.
    ///
    /// # Errors
    /// - Store kind not registered
    /// - Options invalid for the store
    pub fn resolve(&self, name: &str, options: &Value) -> Result<Arc<dyn KeyValueStore>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Store '{}' is not registered", name)))?;
        factory(options)
    }

    /// Get list of registered store names, sorted.
    pub fn stores(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_store(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn quota_option(options: &Value) -> Result<Option<u64>> {
    match options.get("quota_bytes") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            Error::InvalidInput("'quota_bytes' must be a non-negative integer".to_string())
        }),
    }
}

fn memory_factory(options: &Value) -> Result<Arc<dyn KeyValueStore>> {
    let store = match quota_option(options)? {
        Some(quota) => crate::memory::MemoryStore::with_quota(quota as usize),
        None => crate::memory::MemoryStore::new(),
    };
    Ok(Arc::new(store))
}

fn local_factory(options: &Value) -> Result<Arc<dyn KeyValueStore>> {
    let root = options
        .get("root")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidInput("Local store requires 'root' path".to_string()))?;
    let mut store = crate::local::LocalStore::new(root)?;
    if let Some(quota) = quota_option(options)? {
        store = store.with_quota(quota);
    }
    Ok(Arc::new(store))
}

/// Create a registry with the built-in stores.
pub fn create_default_registry() -> Result<StoreRegistry> {
    let mut registry = StoreRegistry::new();
    registry.register("memory", Box::new(memory_factory))?;
    registry.register("local", Box::new(local_factory))?;
    Ok(registry)
}
