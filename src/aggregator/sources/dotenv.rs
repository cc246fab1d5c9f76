//! `.env` file source.
//!
//! # Format
//! ```text
//! # comment
//! export APP_X=dotenv          → {"x": "dotenv"}   (prefix "APP_" stripped)
//! APP_DB__PORT=5432            → {"db": {"port": 5432}}
//! APP_GREETING="hello\nworld"
//! ```
//! Lines are parsed by `dotenvy` (quoting, escapes, `export`, comments).
//! Keys are lower-cased and `__` nests; values are typed like flat scalars.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::aggregator::merge::{insert_path, parse_scalar};
use crate::unit::{ConfigSource, SourceError};

/// Parse `.env` text into `(key, value)` assignments, in file order.
pub fn parse_dotenv(text: &str) -> Result<Vec<(String, String)>, SourceError> {
    dotenvy::from_read_iter(text.as_bytes())
        .map(|item| item.map_err(SourceError::from))
        .collect()
}

#[derive(Debug, Clone)]
pub struct DotEnvSource {
    path: PathBuf,
    prefix: Option<String>,
    include_process_env: bool,
    optional: bool,
}

impl DotEnvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            prefix: None,
            include_process_env: false,
            optional: false,
        }
    }

    /// Only keys starting with `prefix` are used, with the prefix removed.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    /// Also read prefixed variables from the process environment; they
    /// override the file. Ignored without a prefix.
    pub fn include_process_env(mut self, include: bool) -> Self {
        self.include_process_env = include;
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    fn key_path(&self, key: &str) -> Option<Vec<String>> {
        let key = match &self.prefix {
            Some(prefix) => key.strip_prefix(prefix.as_str())?,
            None => key,
        };
        let path: Vec<String> = key
            .split("__")
            .filter(|s| !s.is_empty())
            .map(|s| s.to_ascii_lowercase())
            .collect();
        (!path.is_empty()).then_some(path)
    }

    fn insert(&self, tree: &mut Value, key: &str, value: Value) {
        if let Some(path) = self.key_path(key) {
            let path: Vec<&str> = path.iter().map(String::as_str).collect();
            insert_path(tree, &path, value);
        }
    }

    /// Build a tree from already-parsed assignments.
    pub fn build(&self, entries: &[(String, String)]) -> Value {
        let mut tree = Value::Object(Map::new());
        for (key, value) in entries {
            self.insert(&mut tree, key, parse_scalar(value));
        }
        tree
    }
}

#[async_trait]
impl ConfigSource for DotEnvSource {
    async fn fetch(&self) -> Result<Value, SourceError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && self.optional => String::new(),
            Err(e) => return Err(e.into()),
        };
        let entries = parse_dotenv(&text)?;
        let mut tree = self.build(&entries);

        if self.include_process_env && self.prefix.is_some() {
            for (key, value) in std::env::vars() {
                self.insert(&mut tree, &key, parse_scalar(&value));
            }
        }
        tracing::debug!(path = %self.path.display(), entries = entries.len(), "Env file read");
        Ok(tree)
    }
}
