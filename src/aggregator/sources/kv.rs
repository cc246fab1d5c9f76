//! Key-value store source.
//!
//! Keys are flat strings such as `app:db:host`; after the source prefix is
//! stripped, the separator splits them into a nested path. Values that parse
//! as JSON keep their JSON type, anything else is a string.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::aggregator::merge::insert_path;
use crate::unit::{ConfigSource, SourceError};

/// A key-value store the source reads from.
#[async_trait]
pub trait KeyValueBackend: Send + Sync + 'static {
    async fn connect(&self) -> Result<(), SourceError>;

    /// Every entry whose key starts with `prefix`.
    async fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>, SourceError>;

    async fn disconnect(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

/// In-process store, optionally seeded from a JSON snapshot file.
#[derive(Clone)]
pub struct MemoryKvStore {
    inner: Arc<DashMap<String, String>>,
    available: Arc<AtomicBool>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Seed from a JSON object of string keys; a missing file gives an empty store.
    pub fn load_snapshot(path: &Path) -> std::io::Result<Self> {
        let store = Self::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let map: HashMap<String, Value> = serde_json::from_reader(reader)?;
            for (key, value) in map {
                let raw = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                store.inner.insert(key, raw);
            }
            tracing::info!(entries = store.inner.len(), path = %path.display(), "Key-value snapshot loaded");
        }
        Ok(store)
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Simulate the store going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueBackend for MemoryKvStore {
    async fn connect(&self) -> Result<(), SourceError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SourceError::Unavailable("key-value store refused the connection".to_string()))
        }
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>, SourceError> {
        self.connect().await?;
        Ok(self
            .inner
            .iter()
            .filter(|r| r.key().starts_with(prefix))
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect())
    }
}

/// Turn a stored value into a tree value.
pub(crate) fn decode_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[derive(Clone)]
pub struct KeyValueSource {
    backend: Arc<dyn KeyValueBackend>,
    prefix: String,
    separator: String,
}

impl KeyValueSource {
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self {
            backend,
            prefix: String::new(),
            separator: ":".to_string(),
        }
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }
}

#[async_trait]
impl ConfigSource for KeyValueSource {
    async fn fetch(&self) -> Result<Value, SourceError> {
        self.backend.connect().await?;
        let mut entries = self.backend.scan(&self.prefix).await?;
        entries.sort();

        let mut tree = Value::Object(Map::new());
        for (key, raw) in &entries {
            let stripped = key.strip_prefix(self.prefix.as_str()).unwrap_or(key);
            let path: Vec<&str> = stripped
                .split(self.separator.as_str())
                .filter(|s| !s.is_empty())
                .collect();
            if path.is_empty() {
                continue;
            }
            insert_path(&mut tree, &path, decode_value(raw));
        }
        tracing::debug!(entries = entries.len(), prefix = %self.prefix, "Key-value entries read");
        Ok(tree)
    }

    async fn release(&self) -> Result<(), SourceError> {
        self.backend.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_prefixed_keys_become_nested() {
        let store = MemoryKvStore::new();
        store.set("app:x", "kv");
        store.set("app:db:port", "6379");
        store.set("app:db:tls", "true");
        store.set("other:x", "ignored");

        let source = KeyValueSource::new(Arc::new(store)).prefix("app:");
        let tree = source.fetch().await.unwrap();
        assert_eq!(tree, json!({"x": "kv", "db": {"port": 6379, "tls": true}}));
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = MemoryKvStore::new();
        store.set_available(false);
        let source = KeyValueSource::new(Arc::new(store));
        assert!(matches!(source.fetch().await, Err(SourceError::Unavailable(_))));
    }

    #[test]
    fn test_snapshot_seeds_store() {
        let path = std::env::temp_dir().join(format!("module-runtime-kv-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{"app:x": "1", "app:db:port": 6379}"#).unwrap();

        let loaded = MemoryKvStore::load_snapshot(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        std::fs::remove_file(&path).unwrap();
        assert!(MemoryKvStore::load_snapshot(&path).unwrap().is_empty());
    }
}
