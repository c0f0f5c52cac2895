use std::collections::{hash_map, HashMap};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use keyring::Entry;

use super::{CredentialStore, StoreKey};

/// Credentials kept in the OS keychain. The keychain service is the
/// namespace and each key becomes one entry.
///
/// Entries are opened once per key and reused, so a value written through
/// this store is read back through the same handle.
pub struct KeyringStore {
    namespace: String,
    entries: Mutex<HashMap<StoreKey, Entry>>,
}

impl KeyringStore {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether this build has a native keychain backend. Elsewhere keyring
    /// only has its in-memory mock, which persists nothing.
    pub const fn is_supported() -> bool {
        cfg!(any(
            target_os = "linux",
            target_os = "macos",
            target_os = "ios",
            target_os = "windows"
        ))
    }

    fn with_entry<T>(
        &self,
        key: StoreKey,
        op: impl FnOnce(&Entry) -> keyring::Result<T>,
    ) -> Result<keyring::Result<T>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = match entries.entry(key) {
            hash_map::Entry::Occupied(occupied) => occupied.into_mut(),
            hash_map::Entry::Vacant(vacant) => {
                let entry = Entry::new(&self.namespace, &key.namespaced(&self.namespace))
                    .context("Failed to create keyring entry")?;
                vacant.insert(entry)
            }
        };
        Ok(op(entry))
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, key: StoreKey) -> Result<Option<String>> {
        match self.with_entry(key, Entry::get_password)? {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve value from keychain"),
        }
    }

    fn set(&self, key: StoreKey, value: &str) -> Result<()> {
        self.with_entry(key, |entry| entry.set_password(value))?
            .context("Failed to store value in keychain")
    }

    fn remove(&self, key: StoreKey) -> Result<()> {
        match self.with_entry(key, Entry::delete_credential)? {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete value from keychain"),
        }
    }
}
