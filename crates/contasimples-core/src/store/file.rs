use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use super::{CredentialStore, StoreKey};

/// Credential file name in the data directory
const CREDENTIALS_FILE: &str = "credentials.json";

/// Credentials kept in a JSON object on disk, keyed by namespaced name.
///
/// Every write rewrites the whole file, so a single `set` or `remove` is
/// all-or-nothing from the point of view of the next reader.
pub struct FileStore {
    dir: PathBuf,
    namespace: String,
}

impl FileStore {
    pub fn new(dir: PathBuf, namespace: &str) -> Self {
        Self {
            dir,
            namespace: namespace.to_string(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(CREDENTIALS_FILE)
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        let path = self.path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read credential file: {}", path.display()))?;
        let entries = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse credential file: {}", path.display()))?;
        Ok(entries)
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let path = self.path();
        if entries.is_empty() {
            if path.exists() {
                std::fs::remove_file(&path).context("Failed to remove credential file")?;
                debug!(path = %path.display(), "Credential file removed");
            }
            return Ok(());
        }

        std::fs::create_dir_all(&self.dir).context("Failed to create data directory")?;
        let contents = serde_json::to_string_pretty(entries)?;

        // Write beside the target and rename so readers never see a torn file
        let tmp = self.dir.join(format!("{}.tmp", CREDENTIALS_FILE));
        std::fs::write(&tmp, contents).context("Failed to write credential file")?;
        std::fs::rename(&tmp, &path).context("Failed to replace credential file")?;
        Ok(())
    }
}

impl CredentialStore for FileStore {
    fn get(&self, key: StoreKey) -> Result<Option<String>> {
        let mut entries = self.load()?;
        Ok(entries.remove(&key.namespaced(&self.namespace)))
    }

    fn set(&self, key: StoreKey, value: &str) -> Result<()> {
        let mut entries = self.load()?;
        entries.insert(key.namespaced(&self.namespace), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: StoreKey) -> Result<()> {
        let mut entries = self.load()?;
        if entries.remove(&key.namespaced(&self.namespace)).is_none() {
            return Ok(());
        }
        self.save(&entries)
    }
}
