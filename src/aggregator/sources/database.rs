//! Relational table source.
//!
//! Reads a two-column `(key, value)` configuration table. Keys are dotted
//! paths (`db.pool.size`); values are decoded like key-value entries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use super::kv::decode_value;
use crate::aggregator::merge::insert_path;
use crate::unit::{ConfigSource, SourceError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRow {
    pub key: String,
    pub value: String,
}

/// A table of configuration rows.
#[async_trait]
pub trait ConfigTable: Send + Sync + 'static {
    async fn rows(&self) -> Result<Vec<ConfigRow>, SourceError>;
}

/// In-process table, optionally seeded from a JSON array of rows.
#[derive(Clone)]
pub struct MemoryConfigTable {
    rows: Arc<RwLock<BTreeMap<String, String>>>,
    available: Arc<AtomicBool>,
}

impl MemoryConfigTable {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(BTreeMap::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn from_rows(rows: impl IntoIterator<Item = ConfigRow>) -> Self {
        let table = Self::new();
        for row in rows {
            table.upsert(row.key, row.value);
        }
        table
    }

    /// Seed from a JSON file; a missing file gives an empty table.
    pub fn load_rows(path: &Path) -> Result<Self, SourceError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let contents = std::fs::read_to_string(path)?;
        let rows: Vec<ConfigRow> = serde_json::from_str(&contents)?;
        tracing::info!(rows = rows.len(), path = %path.display(), "Config rows loaded");
        Ok(Self::from_rows(rows))
    }

    pub fn upsert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.rows
            .write()
            .expect("config table lock poisoned")
            .insert(key.into(), value.into());
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl Default for MemoryConfigTable {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigTable for MemoryConfigTable {
    async fn rows(&self) -> Result<Vec<ConfigRow>, SourceError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("database is not reachable".to_string()));
        }
        Ok(self
            .rows
            .read()
            .expect("config table lock poisoned")
            .iter()
            .map(|(key, value)| ConfigRow {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }
}

#[derive(Clone)]
pub struct DatabaseSource {
    table: Arc<dyn ConfigTable>,
}

impl DatabaseSource {
    pub fn new(table: Arc<dyn ConfigTable>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl ConfigSource for DatabaseSource {
    async fn fetch(&self) -> Result<Value, SourceError> {
        let rows = self.table.rows().await?;
        let mut tree = Value::Object(Map::new());
        for row in &rows {
            let path: Vec<&str> = row.key.split('.').filter(|s| !s.is_empty()).collect();
            if path.is_empty() {
                continue;
            }
            insert_path(&mut tree, &path, decode_value(&row.value));
        }
        tracing::debug!(rows = rows.len(), "Config rows read");
        Ok(tree)
    }
}
