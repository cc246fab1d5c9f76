//! Dependency injection between units.
//!
//! # Data Flow
//! ```text
//! Registration:
//!     tree.register(parent, spec)
//!     → check_cycles(new node)      walk the transitive dependency set
//!     → CircularDependency          registration undone, nothing loaded
//!
//! Load:
//!     unit enters Loading
//!     → bind(unit)                  for each declared name:
//!         locate(name)              siblings first, then each ancestor's children
//!         settle if Loading         same-wave dependency, bounded wait
//!         require Loaded            otherwise DependencyNotLoaded
//!     → Dependencies handed to Leaf::load through its UnitContext
//! ```
//!
//! # Design Decisions
//! - Names resolve lexically: the nearest enclosing scope wins
//! - A dependency on an ancestor is a cycle (the ancestor waits for its children)
//! - An unresolved dependency fails the requesting unit; there is no retry

pub mod bindings;

use std::collections::HashSet;
use std::time::Duration;

pub use bindings::{Binding, Dependencies};

use crate::error::{RuntimeError, RuntimeResult};
use crate::tree::arena::{Arena, NodeRuntime};
use crate::tree::{ModuleTree, NodeId};
use crate::unit::UnitState;

/// Resolves named references between units of one tree.
#[derive(Debug, Clone)]
pub struct DependencyInjector {
    dependency_timeout: Duration,
}

impl DependencyInjector {
    pub fn new(dependency_timeout: Duration) -> Self {
        Self { dependency_timeout }
    }

    /// Find the node `name` refers to from `unit`'s point of view.
    pub(crate) fn locate(arena: &Arena, unit: NodeId, name: &str) -> Option<NodeId> {
        let mut scope = arena.parent_of(unit);
        while let Some(s) = scope {
            if let Some(found) = arena.child_named(s, name) {
                return Some(found);
            }
            scope = arena.parent_of(s);
        }
        None
    }

    /// Resolve `name` for `unit` without waiting.
    pub(crate) fn resolve(arena: &Arena, unit: NodeId, name: &str) -> RuntimeResult<Binding> {
        let requester = arena
            .runtime(unit)
            .ok_or_else(|| RuntimeError::UnitNotFound(unit.to_string()))?;
        let target = Self::locate(arena, unit, name)
            .and_then(|id| arena.runtime(id))
            .ok_or_else(|| RuntimeError::DependencyMissing {
                unit: requester.path.clone(),
                dependency: name.to_string(),
            })?;
        Self::bind_loaded(&requester, name, &target, target.state.get())
    }

    /// Resolve every declared dependency of `unit`.
    ///
    /// A dependency still `Loading` (a same-wave sibling) is awaited up to the
    /// dependency timeout; any other non-`Loaded` state fails immediately.
    pub(crate) async fn bind(&self, tree: &ModuleTree, unit: &NodeRuntime) -> RuntimeResult<Dependencies> {
        let mut deps = Dependencies::default();
        for name in &unit.spec.dependencies {
            let target = {
                let arena = tree.arena();
                Self::locate(&arena, unit.id, name).and_then(|id| arena.runtime(id))
            };
            let target = target.ok_or_else(|| RuntimeError::DependencyMissing {
                unit: unit.path.clone(),
                dependency: name.clone(),
            })?;

            let mut state = target.state.get();
            if state == UnitState::Loading {
                tracing::debug!(unit = %unit.path, dependency = %target.path, "Waiting for dependency to settle");
                state = target.state.settle(self.dependency_timeout).await;
            }
            deps.insert(Self::bind_loaded(unit, name, &target, state)?);
        }
        Ok(deps)
    }

    fn bind_loaded(
        requester: &NodeRuntime,
        name: &str,
        target: &NodeRuntime,
        state: UnitState,
    ) -> RuntimeResult<Binding> {
        let not_loaded = |state| RuntimeError::DependencyNotLoaded {
            unit: requester.path.clone(),
            dependency: name.to_string(),
            state,
        };
        if state != UnitState::Loaded {
            return Err(not_loaded(state));
        }
        let instance = target
            .existing_instance()
            .ok_or_else(|| not_loaded(UnitState::Unloaded))?;
        Ok(Binding::new(name, target.path.clone(), instance))
    }

    /// Fail if `start`'s transitive dependency set revisits a unit on the
    /// current resolution path.
    pub(crate) fn check_cycles(arena: &Arena, start: NodeId) -> RuntimeResult<()> {
        let mut path = Vec::new();
        let mut done = HashSet::new();
        Self::visit(arena, start, &mut path, &mut done)
    }

    fn visit(
        arena: &Arena,
        id: NodeId,
        path: &mut Vec<NodeId>,
        done: &mut HashSet<NodeId>,
    ) -> RuntimeResult<()> {
        if let Some(pos) = path.iter().position(|p| *p == id) {
            return Err(Self::cycle(arena, &path[pos..], id));
        }
        if done.contains(&id) {
            return Ok(());
        }
        let Some(spec) = arena.spec(id) else {
            return Ok(());
        };

        path.push(id);
        for dep in &spec.dependencies {
            let Some(target) = Self::locate(arena, id, dep) else {
                continue;
            };
            if arena.is_ancestor(target, id) {
                return Err(Self::cycle(arena, path, target));
            }
            Self::visit(arena, target, path, done)?;
        }
        path.pop();
        done.insert(id);
        Ok(())
    }

    fn cycle(arena: &Arena, path: &[NodeId], closing: NodeId) -> RuntimeError {
        let name = |id: &NodeId| {
            arena
                .spec(*id)
                .map(|s| s.name.clone())
                .unwrap_or_else(|| id.to_string())
        };
        let mut names: Vec<String> = path.iter().map(name).collect();
        names.push(name(&closing));
        RuntimeError::CircularDependency { path: names }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{Group, Unit, UnitFactory, UnitSpec};
    use std::sync::Arc;

    fn factory() -> UnitFactory {
        Arc::new(|| Unit::service(Group))
    }

    #[test]
    fn test_locate_prefers_nearest_scope() {
        let mut arena = Arena::default();
        let root = arena.insert(None, UnitSpec::new("app"), factory());
        let outer_db = arena.insert(Some(root), UnitSpec::new("db"), factory());
        let http = arena.insert(Some(root), UnitSpec::new("http"), factory());
        let inner_db = arena.insert(Some(http), UnitSpec::new("db"), factory());
        let auth = arena.insert(Some(http), UnitSpec::new("auth"), factory());
        let metrics = arena.insert(Some(root), UnitSpec::new("metrics"), factory());

        assert_eq!(DependencyInjector::locate(&arena, auth, "db"), Some(inner_db));
        assert_eq!(DependencyInjector::locate(&arena, metrics, "db"), Some(outer_db));
        assert_eq!(DependencyInjector::locate(&arena, auth, "metrics"), Some(metrics));
        assert_eq!(DependencyInjector::locate(&arena, auth, "nope"), None);
    }

    #[test]
    fn test_two_node_cycle() {
        let mut arena = Arena::default();
        let root = arena.insert(None, UnitSpec::new("app"), factory());
        arena.insert(Some(root), UnitSpec::new("a").depends_on("b"), factory());
        let b = arena.insert(Some(root), UnitSpec::new("b").depends_on("a"), factory());

        match DependencyInjector::check_cycles(&arena, b) {
            Err(RuntimeError::CircularDependency { path }) => {
                assert_eq!(path, vec!["b", "a", "b"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_dependency_on_ancestor_is_cycle() {
        let mut arena = Arena::default();
        let root = arena.insert(None, UnitSpec::new("app"), factory());
        let http = arena.insert(Some(root), UnitSpec::new("http"), factory());
        let auth = arena.insert(Some(http), UnitSpec::new("auth").depends_on("http"), factory());

        assert!(matches!(
            DependencyInjector::check_cycles(&arena, auth),
            Err(RuntimeError::CircularDependency { .. })
        ));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let mut arena = Arena::default();
        let root = arena.insert(None, UnitSpec::new("app"), factory());
        arena.insert(Some(root), UnitSpec::new("db"), factory());
        arena.insert(Some(root), UnitSpec::new("cache").depends_on("db"), factory());
        arena.insert(Some(root), UnitSpec::new("users").depends_on("db"), factory());
        let api = arena.insert(
            Some(root),
            UnitSpec::new("api").depends_on("cache").depends_on("users"),
            factory(),
        );
        assert!(DependencyInjector::check_cycles(&arena, api).is_ok());
    }

    #[test]
    fn test_resolve_requires_loaded() {
        let mut arena = Arena::default();
        let root = arena.insert(None, UnitSpec::new("app"), factory());
        let db = arena.insert(Some(root), UnitSpec::new("db"), factory());
        let api = arena.insert(Some(root), UnitSpec::new("api").depends_on("db"), factory());

        assert!(matches!(
            DependencyInjector::resolve(&arena, api, "db"),
            Err(RuntimeError::DependencyNotLoaded { state: UnitState::Unloaded, .. })
        ));
        assert!(matches!(
            DependencyInjector::resolve(&arena, api, "cache"),
            Err(RuntimeError::DependencyMissing { .. })
        ));

        let runtime = arena.runtime(db).unwrap();
        let _ = runtime.instance();
        runtime.state.transition(UnitState::Unloaded, UnitState::Loading).unwrap();
        runtime.state.transition(UnitState::Loading, UnitState::Loaded).unwrap();

        let binding = DependencyInjector::resolve(&arena, api, "db").unwrap();
        assert_eq!(binding.path(), "app/db");
    }
}
