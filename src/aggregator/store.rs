//! Layered configuration store.
//!
//! Each config source contributes one layer keyed by `(priority, name)`.
//! The effective tree is the fold of every layer in ascending key order, so
//! the highest priority wins on conflicting keys. Readers load the
//! effective tree through an `ArcSwap` and never block writers; writers
//! rebuild and swap it once per batch.

use arc_swap::ArcSwap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::merge::{deep_merge, lookup};
use crate::observability::metrics;

/// Identity and precedence of one layer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerKey {
    pub priority: i32,
    pub name: String,
}

impl LayerKey {
    pub fn new(priority: i32, name: impl Into<String>) -> Self {
        Self {
            priority,
            name: name.into(),
        }
    }
}

/// One source's contribution.
#[derive(Debug, Clone)]
pub struct Layer {
    pub key: LayerKey,
    pub tree: Arc<Value>,
}

impl Layer {
    pub fn new(priority: i32, name: impl Into<String>, tree: Value) -> Self {
        Self {
            key: LayerKey::new(priority, name),
            tree: Arc::new(tree),
        }
    }
}

pub struct ConfigStore {
    layers: Mutex<BTreeMap<LayerKey, Arc<Value>>>,
    effective: ArcSwap<Value>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            layers: Mutex::new(BTreeMap::new()),
            effective: ArcSwap::from_pointee(Value::Object(Map::new())),
        }
    }

    /// Add or replace `layers`, then swap the effective tree once.
    pub fn apply(&self, layers: Vec<Layer>) {
        if layers.is_empty() {
            return;
        }
        let mut current = self.layers.lock().expect("config layers mutex poisoned");
        for layer in layers {
            current.insert(layer.key, layer.tree);
        }
        self.rebuild(&current);
    }

    /// Drop the named layers, then swap once.
    pub fn remove(&self, keys: &[LayerKey]) {
        let mut current = self.layers.lock().expect("config layers mutex poisoned");
        let before = current.len();
        for key in keys {
            current.remove(key);
        }
        if current.len() != before {
            self.rebuild(&current);
        }
    }

    /// Copies of the layers whose name starts with `prefix`.
    pub fn layers_under(&self, prefix: &str) -> Vec<Layer> {
        self.layers
            .lock()
            .expect("config layers mutex poisoned")
            .iter()
            .filter(|(key, _)| key.name.starts_with(prefix))
            .map(|(key, tree)| Layer {
                key: key.clone(),
                tree: tree.clone(),
            })
            .collect()
    }

    fn rebuild(&self, layers: &BTreeMap<LayerKey, Arc<Value>>) {
        let mut merged = Value::Object(Map::new());
        for tree in layers.values() {
            deep_merge(&mut merged, tree);
        }
        let keys = count_leaves(&merged);
        self.effective.store(Arc::new(merged));
        metrics::record_config_keys(keys);
        tracing::debug!(layers = layers.len(), keys, "Configuration swapped");
    }

    /// The effective tree as of now; later swaps do not affect it.
    pub fn snapshot(&self) -> Arc<Value> {
        self.effective.load_full()
    }

    /// Value at a dotted key in the effective tree.
    pub fn get(&self, key: &str) -> Option<Value> {
        lookup(&self.effective.load(), key).cloned()
    }

    /// The subtree a unit named `name` is configured by; null if absent.
    pub fn slice(&self, name: &str) -> Value {
        self.effective
            .load()
            .get(name)
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn layer_keys(&self) -> Vec<LayerKey> {
        self.layers
            .lock()
            .expect("config layers mutex poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.lock().expect("config layers mutex poisoned").len()
    }
}

fn count_leaves(value: &Value) -> usize {
    match value {
        Value::Object(map) => map.values().map(count_leaves).sum(),
        _ => 1,
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("layers", &self.layer_keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_highest_priority_wins() {
        let store = ConfigStore::new();
        store.apply(vec![
            Layer::new(40, "dotenv", json!({"x": "dotenv"})),
            Layer::new(10, "file", json!({"x": "file", "only_file": 1})),
        ]);
        assert_eq!(store.get("x"), Some(json!("dotenv")));
        assert_eq!(store.get("only_file"), Some(json!(1)));
    }

    #[test]
    fn test_remove_restores_lower_layer() {
        let store = ConfigStore::new();
        store.apply(vec![Layer::new(10, "file", json!({"x": 1}))]);
        store.apply(vec![Layer::new(20, "kv", json!({"x": 2}))]);
        assert_eq!(store.get("x"), Some(json!(2)));

        store.remove(&[LayerKey::new(20, "kv")]);
        assert_eq!(store.get("x"), Some(json!(1)));
        assert_eq!(store.layer_count(), 1);
    }

    #[test]
    fn test_snapshot_is_stable_across_swaps() {
        let store = ConfigStore::new();
        store.apply(vec![Layer::new(10, "file", json!({"x": 1}))]);
        let before = store.snapshot();
        store.apply(vec![Layer::new(10, "file", json!({"x": 2}))]);
        assert_eq!(before["x"], json!(1));
        assert_eq!(store.get("x"), Some(json!(2)));
    }

    #[test]
    fn test_slice_and_layers_under() {
        let store = ConfigStore::new();
        store.apply(vec![
            Layer::new(10, "configuration/file", json!({"http": {"port": 80}})),
            Layer::new(i32::MAX, "overrides", json!({"debug": true})),
        ]);
        assert_eq!(store.slice("http"), json!({"port": 80}));
        assert_eq!(store.slice("missing"), Value::Null);

        let sources = store.layers_under("configuration/");
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].key, LayerKey::new(10, "configuration/file"));

        store.remove(&[LayerKey::new(10, "configuration/file"), LayerKey::new(i32::MAX, "overrides")]);
        assert_eq!(*store.snapshot(), json!({}));
        store.apply(sources);
        assert_eq!(store.get("http.port"), Some(json!(80)));
    }
}
