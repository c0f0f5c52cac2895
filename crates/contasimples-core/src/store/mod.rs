//! Device-local credential persistence.
//!
//! A `CredentialStore` holds at most one token and one serialized user
//! profile under two namespaced keys. Backends:
//! - `FileStore`: JSON file in the local data directory
//! - `KeyringStore`: OS keychain via `keyring`
//! - `MemoryStore`: process-local, used by tests and throwaway sessions
//!
//! Stores provide no multi-key transactions. Keeping `token` and `user`
//! consistent is the session controller's job.

pub mod file;
pub mod keychain;
pub mod memory;

use std::fmt;

use anyhow::Result;

use crate::config::{Config, StorageBackend};

pub use self::file::FileStore;
pub use self::keychain::KeyringStore;
pub use self::memory::MemoryStore;

/// The two logical keys the session controller persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Token,
    User,
}

impl StoreKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::Token => "token",
            StoreKey::User => "user",
        }
    }

    /// Full storage name, e.g. `@ContaSimples:token`
    pub fn namespaced(&self, namespace: &str) -> String {
        format!("@{}:{}", namespace, self.as_str())
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait CredentialStore: Send + Sync {
    /// Raw persisted value, or `None` if never written
    fn get(&self, key: StoreKey) -> Result<Option<String>>;

    /// Overwrite the value for `key`
    fn set(&self, key: StoreKey, value: &str) -> Result<()>;

    /// Delete the value for `key`. Removing an absent key is not an error.
    fn remove(&self, key: StoreKey) -> Result<()>;
}

impl<S: CredentialStore + ?Sized> CredentialStore for Box<S> {
    fn get(&self, key: StoreKey) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: StoreKey, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: StoreKey) -> Result<()> {
        (**self).remove(key)
    }
}

/// Open the backend selected in `config`
pub fn open_store(config: &Config) -> Result<Box<dyn CredentialStore>> {
    let store: Box<dyn CredentialStore> = match config.storage {
        StorageBackend::File => Box::new(FileStore::new(Config::data_dir()?, &config.namespace)),
        StorageBackend::Keyring => {
            if !KeyringStore::is_supported() {
                anyhow::bail!("No native keychain on this platform; use the file storage backend");
            }
            Box::new(KeyringStore::new(&config.namespace))
        }
        StorageBackend::Memory => Box::new(MemoryStore::new(&config.namespace)),
    };
    tracing::debug!(backend = ?config.storage, namespace = %config.namespace, "Credential store opened");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaced_keys() {
        assert_eq!(StoreKey::Token.namespaced("ContaSimples"), "@ContaSimples:token");
        assert_eq!(StoreKey::User.namespaced("ContaSimples"), "@ContaSimples:user");
        assert_eq!(StoreKey::User.namespaced("staging"), "@staging:user");
    }

    #[test]
    fn test_open_memory_store() {
        let config = Config {
            storage: StorageBackend::Memory,
            ..Config::default()
        };
        let store = open_store(&config).expect("open memory store");
        assert_eq!(store.get(StoreKey::Token).unwrap(), None);
        store.set(StoreKey::Token, "t1").unwrap();
        assert_eq!(store.get(StoreKey::Token).unwrap().as_deref(), Some("t1"));
    }
}
