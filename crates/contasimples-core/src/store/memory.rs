use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;

use super::{CredentialStore, StoreKey};

/// In-process store. Clones share the same entries, so a test can keep a
/// handle while the session controller owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    namespace: String,
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            entries: Arc::default(),
        }
    }

    /// Number of keys currently held
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: StoreKey) -> Result<Option<String>> {
        Ok(self.entries().get(&key.namespaced(&self.namespace)).cloned())
    }

    fn set(&self, key: StoreKey, value: &str) -> Result<()> {
        self.entries()
            .insert(key.namespaced(&self.namespace), value.to_string());
        Ok(())
    }

    fn remove(&self, key: StoreKey) -> Result<()> {
        self.entries().remove(&key.namespaced(&self.namespace));
        Ok(())
    }
}
