//! In-process key/value store used for local runs and tests.

use std::{fs, path::Path};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::application::store::{KeyPage, StoreError, StoreReader};

use super::error::InfraError;

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Load a JSON object of `key -> value` pairs. String values are stored verbatim,
    /// anything else as its JSON text.
    pub fn load_seed_file(&self, path: &Path) -> Result<usize, InfraError> {
        let text = fs::read_to_string(path)?;
        let seed: Map<String, Value> = serde_json::from_str(&text).map_err(|err| {
            InfraError::configuration(format!(
                "seed file `{}` is not a JSON object: {err}",
                path.display()
            ))
        })?;

        let count = seed.len();
        for (key, value) in seed {
            match value {
                Value::String(text) => self.put(key, text),
                other => self.put(key, other.to_string()),
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl StoreReader for MemoryStore {
    /// The whole listing in one sorted batch.
    async fn scan_keys(&self, prefix: &str, _cursor: u64) -> Result<KeyPage, StoreError> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort_unstable();
        Ok(KeyPage::last(keys))
    }

    async fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }
}
