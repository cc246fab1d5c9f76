//! Configuration aggregation.
//!
//! # Data Flow
//! ```text
//! load_async(overrides)
//!     → private ModuleTree "configuration", one config-source unit per source
//!     → waves by priority: File(10) → Redis(20) → Database(30) → DotEnv(40)
//!         → source.fetch() (retried with backoff)
//!         → layer swapped into the shared ConfigStore after its wave
//!     → overrides layer (above every source)
//!     → LoadReport [{type: "services", status: {source: bool}}]
//!
//! reload()
//!     → current source layers set aside, sources unloaded and loaded again
//!     → on failure: failed sources reset, the set-aside layers restored
//!
//! get("db.host") → ConfigStore effective tree (lock-free read)
//! ```
//!
//! # Design Decisions
//! - Sources are ordinary lifecycle units; the aggregator is a thin driver
//!   over its own tree
//! - A failing source is reported `false` and contributes no keys; the
//!   remaining sources still load unless the failing one is required
//! - The store is shared with the application tree so units read their
//!   configuration slice at load time

pub mod merge;
pub mod sources;
pub mod store;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub use merge::deep_merge;
pub use store::{ConfigStore, Layer, LayerKey};

use crate::config::SourcesConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::tree::{LoadReport, LoaderSettings, ModuleTree, NodeId, UnitStatus};
use crate::unit::{ConfigSource, Leaf, Unit, UnitContext, UnitError, UnitSpec, UnitState};
use sources::{
    DatabaseSource, DotEnvSource, FileSource, KeyValueSource, MemoryConfigTable, MemoryKvStore,
    DATABASE_SOURCE, DOTENV_SOURCE, FILE_SOURCE, KV_SOURCE,
};

/// Name of the aggregator's tree root.
pub const ROOT: &str = "configuration";

/// Layer name reserved for `load_async` overrides.
pub const OVERRIDES: &str = "overrides";

/// Merges every registered source into one effective configuration.
pub struct ConfigurationAggregator {
    tree: ModuleTree,
}

impl ConfigurationAggregator {
    pub fn new(store: Arc<ConfigStore>, settings: LoaderSettings) -> Self {
        Self {
            tree: ModuleTree::with_store(ROOT, store, settings),
        }
    }

    /// Build the canonical source set from host settings.
    pub fn from_config(
        config: &SourcesConfig,
        store: Arc<ConfigStore>,
        settings: LoaderSettings,
    ) -> RuntimeResult<Self> {
        let aggregator = Self::new(store, settings);

        let file = &config.file;
        if file.enabled {
            aggregator.add_source(
                source_spec(FILE_SOURCE, file.priority, file.required, file.retries),
                FileSource::new(&file.path).optional(file.optional),
            )?;
        }

        let kv = &config.kv;
        if kv.enabled {
            let backend = match kv.snapshot.as_deref() {
                Some(path) => MemoryKvStore::load_snapshot(Path::new(path)).map_err(|e| {
                    RuntimeError::ConfigSourceUnavailable {
                        source_name: KV_SOURCE.to_string(),
                        source: e.into(),
                    }
                })?,
                None => MemoryKvStore::new(),
            };
            aggregator.add_source(
                source_spec(KV_SOURCE, kv.priority, kv.required, kv.retries),
                KeyValueSource::new(Arc::new(backend))
                    .prefix(kv.prefix.clone())
                    .separator(kv.separator.clone()),
            )?;
        }

        let database = &config.database;
        if database.enabled {
            let table = match database.rows.as_deref() {
                Some(path) => MemoryConfigTable::load_rows(Path::new(path)).map_err(|source| {
                    RuntimeError::ConfigSourceUnavailable {
                        source_name: DATABASE_SOURCE.to_string(),
                        source,
                    }
                })?,
                None => MemoryConfigTable::new(),
            };
            aggregator.add_source(
                source_spec(DATABASE_SOURCE, database.priority, database.required, database.retries),
                DatabaseSource::new(Arc::new(table)),
            )?;
        }

        let dotenv = &config.dotenv;
        if dotenv.enabled {
            aggregator.add_source(
                source_spec(DOTENV_SOURCE, dotenv.priority, dotenv.required, dotenv.retries),
                DotEnvSource::new(&dotenv.path)
                    .prefix(dotenv.prefix.clone())
                    .include_process_env(dotenv.include_process_env)
                    .optional(dotenv.optional),
            )?;
        }

        Ok(aggregator)
    }

    /// Register a source; it is constructed afresh (cloned) on every load.
    pub fn add_source<S>(&self, spec: UnitSpec, source: S) -> RuntimeResult<NodeId>
    where
        S: ConfigSource + Clone,
    {
        self.tree
            .register(self.tree.root(), spec, move || Unit::config_source(source.clone()))
    }

    /// Load every source, then apply `overrides` above them.
    ///
    /// Calling this again while loaded returns the previous report.
    pub async fn load_async(&self, overrides: Option<Value>) -> RuntimeResult<LoadReport> {
        let retained = if self.tree.state(self.tree.root()) == Some(UnitState::Unloaded) {
            self.take_source_layers()
        } else {
            Vec::new()
        };
        let report = match self.tree.load(self.tree.root()).await {
            Ok(report) => report,
            Err(err) => return Err(self.restore(retained, err)),
        };
        if let Some(overrides) = overrides {
            self.store().apply(vec![Layer::new(i32::MAX, OVERRIDES, overrides)]);
        }
        Ok(report)
    }

    /// Unload every source and drop their layers and the overrides.
    ///
    /// After a failed reload the sources are already unloaded; only the
    /// layers kept from the last good load are dropped.
    pub async fn unload_async(&self) -> RuntimeResult<LoadReport> {
        let report = if self.tree.state(self.tree.root()) == Some(UnitState::Unloaded)
            && !self.store().layers_under(&source_prefix()).is_empty()
        {
            self.take_source_layers();
            LoadReport::new()
        } else {
            self.tree.unload(self.tree.root()).await?
        };
        self.store().remove(&[LayerKey::new(i32::MAX, OVERRIDES)]);
        Ok(report)
    }

    /// Re-read every source. Overrides survive.
    ///
    /// If the reload fails, the layers of the last good load are put back
    /// and the sources are left `Unloaded`, ready for the next attempt.
    pub async fn reload(&self) -> RuntimeResult<LoadReport> {
        let previous = self.take_source_layers();
        match self.tree.reload(self.tree.root()).await {
            Ok(report) => Ok(report),
            Err(err) => Err(self.restore(previous, err)),
        }
    }

    fn take_source_layers(&self) -> Vec<Layer> {
        let layers = self.store().layers_under(&source_prefix());
        let keys: Vec<LayerKey> = layers.iter().map(|l| l.key.clone()).collect();
        self.store().remove(&keys);
        layers
    }

    /// Undo a failed load or reload: reset the sources, restore `previous`.
    fn restore(&self, previous: Vec<Layer>, err: RuntimeError) -> RuntimeError {
        let root = self.tree.root();
        if self.tree.state(root) == Some(UnitState::Failed) {
            if let Err(reset) = self.tree.reset(root) {
                tracing::warn!(error = %reset, "Could not reset configuration sources");
            }
        }
        if !previous.is_empty() {
            tracing::warn!(layers = previous.len(), error = %err, "Restoring previous configuration layers");
            self.store().apply(previous);
        }
        err
    }

    /// Value at a dotted key in the effective configuration.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.store().get(key)
    }

    /// `get` deserialized into `T`; `None` if absent or of the wrong shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn snapshot(&self) -> Arc<Value> {
        self.store().snapshot()
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        self.tree.store()
    }

    /// State of every registered source.
    pub fn source_states(&self) -> Vec<UnitStatus> {
        self.tree
            .children(self.tree.root())
            .into_iter()
            .filter_map(|id| self.tree.status(id))
            .collect()
    }

    pub fn tree(&self) -> &ModuleTree {
        &self.tree
    }
}

fn source_prefix() -> String {
    format!("{ROOT}/")
}

fn source_spec(name: &str, priority: i32, required: bool, retries: u32) -> UnitSpec {
    let spec = UnitSpec::new(name).priority(priority).retries(retries);
    if required {
        spec.required()
    } else {
        spec
    }
}

/// Mounts an aggregator inside an application tree.
///
/// Its per-source report is nested into the application's load report.
pub struct AggregatorUnit {
    aggregator: Arc<ConfigurationAggregator>,
    last: Mutex<Option<LoadReport>>,
}

impl AggregatorUnit {
    pub fn new(aggregator: Arc<ConfigurationAggregator>) -> Self {
        Self {
            aggregator,
            last: Mutex::new(None),
        }
    }

    fn remember(&self, report: LoadReport) {
        *self.last.lock().expect("aggregator report mutex poisoned") = Some(report);
    }
}

#[async_trait]
impl Leaf for AggregatorUnit {
    async fn load(&self, _ctx: UnitContext) -> Result<(), UnitError> {
        let report = self
            .aggregator
            .load_async(None)
            .await
            .map_err(|e| UnitError::other(e.to_string()))?;
        self.remember(report);
        Ok(())
    }

    async fn unload(&self) -> Result<(), UnitError> {
        let report = self
            .aggregator
            .unload_async()
            .await
            .map_err(|e| UnitError::other(e.to_string()))?;
        self.remember(report);
        Ok(())
    }

    fn report(&self) -> Option<LoadReport> {
        self.last.lock().expect("aggregator report mutex poisoned").clone()
    }
}
