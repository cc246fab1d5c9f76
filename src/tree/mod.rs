//! Module tree and loader.
//!
//! # Data Flow
//! ```text
//! Host holds one ModuleTree
//!     register(parent, spec, factory)   declarations only, cycle-checked
//!     load(root)
//!         → root enters Loading, dependencies bound, own load
//!         → children partitioned into priority waves (ascending)
//!         → each wave: members load concurrently, joined before the next wave
//!             → members recurse into their own children
//!             → config-source members contribute one layer each,
//!               swapped into the ConfigStore once per wave
//!         → root Loaded, LoadReport bubbles back up
//!     unload(root)   same walk, waves descending, children before own unload
//! ```
//!
//! # Design Decisions
//! - Parent links are arena ids, never references
//! - One pending operation per subtree; overlapping requests are rejected
//! - A required failure aborts the invocation and unloads everything it
//!   loaded (best effort, not transactional)
//! - Cancellation is observed between waves only

pub mod arena;
pub mod loader;
pub mod report;
pub mod wave;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use std::time::Duration;

pub use arena::NodeId;
pub use report::{LoadReport, ReportEntry};

use crate::aggregator::ConfigStore;
use crate::error::{RuntimeError, RuntimeResult};
use crate::inject::{Binding, DependencyInjector};
use crate::unit::{Group, Unit, UnitKind, UnitSpec, UnitState};
use arena::{Arena, NodeRuntime};

/// What `load` does when the unit is already `Loaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatLoadPolicy {
    /// Return the cached report if no child was added or removed since.
    #[default]
    Idempotent,
    /// Always a lifecycle violation.
    Reject,
}

/// Loader tuning.
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    /// How long a unit waits for a same-wave dependency still `Loading`.
    pub dependency_timeout: Duration,
    /// Deadline for one leaf load/unload or one source fetch attempt.
    pub unit_timeout: Option<Duration>,
    pub repeat_load: RepeatLoadPolicy,
    /// Backoff bounds between config source fetch attempts.
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            dependency_timeout: Duration::from_secs(30),
            unit_timeout: None,
            repeat_load: RepeatLoadPolicy::Idempotent,
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_millis(2000),
        }
    }
}

/// Host-facing view of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub path: String,
    /// `None` until the unit has been constructed by a load.
    pub kind: Option<UnitKind>,
    pub priority: i32,
    pub required: bool,
    pub dependencies: Vec<String>,
    pub state: UnitState,
}

impl UnitStatus {
    fn of(runtime: &NodeRuntime) -> Self {
        Self {
            path: runtime.path.clone(),
            kind: runtime.kind(),
            priority: runtime.spec.priority,
            required: runtime.spec.required,
            dependencies: runtime.spec.dependencies.clone(),
            state: runtime.state.get(),
        }
    }
}

/// A tree of lifecycle units rooted at a no-op group.
pub struct ModuleTree {
    arena: RwLock<Arena>,
    root: NodeId,
    store: Arc<ConfigStore>,
    settings: LoaderSettings,
    injector: DependencyInjector,
    pending: Mutex<HashSet<NodeId>>,
}

impl ModuleTree {
    /// A tree with its own empty configuration store and default settings.
    pub fn new(root: impl Into<String>) -> Self {
        Self::with_store(root, Arc::new(ConfigStore::new()), LoaderSettings::default())
    }

    /// A tree whose units read (and whose config sources write) `store`.
    pub fn with_store(root: impl Into<String>, store: Arc<ConfigStore>, settings: LoaderSettings) -> Self {
        let mut arena = Arena::default();
        let root = arena.insert(None, UnitSpec::new(root), Arc::new(|| Unit::component(Group)));
        let injector = DependencyInjector::new(settings.dependency_timeout);
        Self {
            arena: RwLock::new(arena),
            root,
            store,
            settings,
            injector,
            pending: Mutex::new(HashSet::new()),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn settings(&self) -> &LoaderSettings {
        &self.settings
    }

    pub(crate) fn arena(&self) -> RwLockReadGuard<'_, Arena> {
        self.arena.read().expect("module tree lock poisoned")
    }

    pub(crate) fn runtime(&self, id: NodeId) -> RuntimeResult<Arc<NodeRuntime>> {
        self.arena()
            .runtime(id)
            .ok_or_else(|| RuntimeError::UnitNotFound(id.to_string()))
    }

    /// Declare a unit under `parent`; `factory` runs when the unit is loaded.
    pub fn register<F>(&self, parent: NodeId, spec: UnitSpec, factory: F) -> RuntimeResult<NodeId>
    where
        F: Fn() -> Unit + Send + Sync + 'static,
    {
        let pending = self.pending.lock().expect("pending operations mutex poisoned");
        let mut arena = self.arena.write().expect("module tree lock poisoned");

        let parent_rt = arena
            .runtime(parent)
            .ok_or_else(|| RuntimeError::UnitNotFound(parent.to_string()))?;
        if pending.iter().any(|p| arena.overlaps(*p, parent)) {
            return Err(RuntimeError::violation(
                &parent_rt.path,
                "register",
                parent_rt.state.get(),
                "an operation is pending on this subtree",
            ));
        }
        if spec.name.is_empty() || spec.name.contains('/') {
            return Err(RuntimeError::InvalidUnitName(spec.name));
        }
        if arena.child_named(parent, &spec.name).is_some() {
            return Err(RuntimeError::DuplicateUnit {
                parent: parent_rt.path.clone(),
                name: spec.name,
            });
        }

        let priority = spec.priority;
        let id = arena.insert(Some(parent), spec, Arc::new(factory));
        if let Err(err) = DependencyInjector::check_cycles(&arena, id) {
            arena.pop(id);
            tracing::warn!(parent = %parent_rt.path, error = %err, "Registration rejected");
            return Err(err);
        }
        arena.touch(parent);

        if let Some(rt) = arena.runtime(id) {
            tracing::debug!(unit = %rt.path, priority, "Registered unit");
        }
        Ok(id)
    }

    /// Detach an unloaded (or failed) subtree.
    pub fn remove(&self, id: NodeId) -> RuntimeResult<()> {
        let pending = self.pending.lock().expect("pending operations mutex poisoned");
        let mut arena = self.arena.write().expect("module tree lock poisoned");

        let runtime = arena
            .runtime(id)
            .ok_or_else(|| RuntimeError::UnitNotFound(id.to_string()))?;
        if id == self.root {
            return Err(RuntimeError::violation(
                &runtime.path,
                "remove",
                runtime.state.get(),
                "the root cannot be removed",
            ));
        }
        if pending.iter().any(|p| arena.overlaps(*p, id)) {
            return Err(RuntimeError::violation(
                &runtime.path,
                "remove",
                runtime.state.get(),
                "an operation is pending on this subtree",
            ));
        }
        for node in arena.subtree(id) {
            if let Some(rt) = arena.runtime(node) {
                let state = rt.state.get();
                if !matches!(state, UnitState::Unloaded | UnitState::Failed) {
                    return Err(RuntimeError::violation(&rt.path, "remove", state, "subtree is not unloaded"));
                }
                rt.discard();
            }
        }
        arena.remove(id);
        tracing::debug!(unit = %runtime.path, "Removed unit");
        Ok(())
    }

    /// Return a failed subtree to `Unloaded`, dropping its instances.
    pub fn reset(&self, id: NodeId) -> RuntimeResult<()> {
        let _guard = self.begin(id, "reset")?;
        let nodes: Vec<Arc<NodeRuntime>> = {
            let arena = self.arena();
            arena.subtree(id).into_iter().filter_map(|n| arena.runtime(n)).collect()
        };
        if let Some(busy) = nodes
            .iter()
            .find(|n| !matches!(n.state.get(), UnitState::Unloaded | UnitState::Failed))
        {
            return Err(RuntimeError::violation(
                &busy.path,
                "reset",
                busy.state.get(),
                "only failed or unloaded units can be reset",
            ));
        }
        for node in nodes {
            node.discard();
            if node.state.transition(UnitState::Failed, UnitState::Unloaded).is_ok() {
                tracing::info!(unit = %node.path, "Unit reset");
            }
        }
        Ok(())
    }

    pub fn state(&self, id: NodeId) -> Option<UnitState> {
        self.arena().runtime(id).map(|rt| rt.state.get())
    }

    /// Look a unit up by its slash-separated path, e.g. `app/http/auth`.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        self.arena().find_path(self.root, path)
    }

    pub fn path(&self, id: NodeId) -> Option<String> {
        self.arena().runtime(id).map(|rt| rt.path.clone())
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.arena()
            .get(id)
            .map(|n| n.children.values().copied().collect())
            .unwrap_or_default()
    }

    pub fn status(&self, id: NodeId) -> Option<UnitStatus> {
        self.arena().runtime(id).map(|rt| UnitStatus::of(&rt))
    }

    /// Every unit, parents before children.
    pub fn statuses(&self) -> Vec<UnitStatus> {
        let arena = self.arena();
        arena
            .subtree(self.root)
            .into_iter()
            .filter_map(|id| arena.runtime(id))
            .map(|rt| UnitStatus::of(&rt))
            .collect()
    }

    /// Resolve `name` from `unit`'s scope; the target must already be `Loaded`.
    pub fn resolve(&self, unit: NodeId, name: &str) -> RuntimeResult<Binding> {
        DependencyInjector::resolve(&self.arena(), unit, name)
    }

    /// Claim `id`'s subtree for one operation.
    pub(crate) fn begin(&self, id: NodeId, operation: &'static str) -> RuntimeResult<OperationGuard<'_>> {
        let mut pending = self.pending.lock().expect("pending operations mutex poisoned");
        let arena = self.arena();
        let runtime = arena
            .runtime(id)
            .ok_or_else(|| RuntimeError::UnitNotFound(id.to_string()))?;
        if pending.iter().any(|p| arena.overlaps(*p, id)) {
            return Err(RuntimeError::violation(
                &runtime.path,
                operation,
                runtime.state.get(),
                "another operation is pending on this subtree",
            ));
        }
        pending.insert(id);
        Ok(OperationGuard { tree: self, id })
    }
}

/// Releases a subtree claim on drop.
pub(crate) struct OperationGuard<'a> {
    tree: &'a ModuleTree,
    id: NodeId,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.tree
            .pending
            .lock()
            .expect("pending operations mutex poisoned")
            .remove(&self.id);
    }
}
