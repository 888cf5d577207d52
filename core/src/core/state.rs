/// Key-value persistence for refresh bookkeeping.
///
/// `JsonFileStore` keeps the whole map in a single JSON file. Every `put`
/// rewrites it with an atomic write (tmp + rename) so a crash mid-flush never
/// leaves a truncated state file behind. A file that no longer parses is
/// logged and replaced on the next `put`.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use log::warn;
use serde_json::Value;

use crate::utils;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;

    /// Durable once this returns `Ok`.
    fn put(&self, key: &str, value: Value) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }
}

pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub const DEFAULT_PATH: &'static str = ".freshen-state.json";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> anyhow::Result<BTreeMap<String, Value>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read state file {}", self.path.display()))?;
        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&data)
            .with_context(|| format!("corrupt state file {}", self.path.display()))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.load()?.remove(key))
    }

    fn put(&self, key: &str, value: Value) -> anyhow::Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("state file lock poisoned"))?;
        let mut entries = match self.load() {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Discarding unreadable state, rewriting it: {:#}", e);
                BTreeMap::new()
            }
        };
        entries.insert(key.to_string(), value);
        utils::write_json_atomic(&self.path, &entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_memory_store_get_put() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);

        store.put("k", json!(42)).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!(42)));
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert_eq!(store.get("lastAttemptAt").unwrap(), None);
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        JsonFileStore::new(&path).put("lastAttemptAt", json!(1234)).unwrap();
        JsonFileStore::new(&path).put("other", json!("x")).unwrap();

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.get("lastAttemptAt").unwrap(), Some(json!(1234)));
        assert_eq!(reopened.get("other").unwrap(), Some(json!("x")));
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn test_file_store_put_replaces_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(store.get("lastAttemptAt").is_err());

        store.put("lastAttemptAt", json!(1)).unwrap();
        assert_eq!(store.get("lastAttemptAt").unwrap(), Some(json!(1)));
        assert!(!dir.path().join("state.json.tmp").exists());
    }
}
