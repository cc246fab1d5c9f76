//! Arena storage for the module tree.
//!
//! Nodes are addressed by [`NodeId`]; a child stores its parent's id, never a
//! reference, so parents own children without ownership cycles. Structural
//! data (names, links, generations) lives here behind the tree's lock; the
//! per-node runtime (state, instance, cached report) is shared out as an `Arc` so
//! the loader can await on it without holding the lock.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::tree::LoadReport;
use crate::unit::{StateCell, Unit, UnitFactory, UnitKind, UnitSpec};

/// Index of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Runtime half of a node, shared with in-flight operations.
pub(crate) struct NodeRuntime {
    pub id: NodeId,
    pub spec: UnitSpec,
    pub path: String,
    pub state: StateCell,
    factory: UnitFactory,
    instance: Mutex<Option<Unit>>,
    /// Set by the first construction and kept across `discard`.
    built: Mutex<Option<UnitKind>>,
    cached: Mutex<Option<(u64, LoadReport)>>,
}

impl NodeRuntime {
    fn new(id: NodeId, spec: UnitSpec, path: String, factory: UnitFactory) -> Self {
        Self {
            id,
            spec,
            path,
            state: StateCell::new(),
            factory,
            instance: Mutex::new(None),
            built: Mutex::new(None),
            cached: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// The live instance, constructing it on first use.
    pub fn instance(&self) -> Unit {
        let mut slot = self.instance.lock().expect("unit instance mutex poisoned");
        let unit = slot.get_or_insert_with(|| (self.factory)()).clone();
        *self.built.lock().expect("unit kind mutex poisoned") = Some(unit.kind());
        unit
    }

    /// The live instance if one has been constructed.
    pub fn existing_instance(&self) -> Option<Unit> {
        self.instance
            .lock()
            .expect("unit instance mutex poisoned")
            .clone()
    }

    /// Kind of the most recently constructed instance, even after it was
    /// discarded; `None` until the factory has run once.
    pub fn kind(&self) -> Option<UnitKind> {
        *self.built.lock().expect("unit kind mutex poisoned")
    }

    pub fn cache_report(&self, generation: u64, report: LoadReport) {
        *self.cached.lock().expect("report cache mutex poisoned") = Some((generation, report));
    }

    pub fn cached_report(&self, generation: u64) -> Option<LoadReport> {
        match &*self.cached.lock().expect("report cache mutex poisoned") {
            Some((g, report)) if *g == generation => Some(report.clone()),
            _ => None,
        }
    }

    /// Drop the instance and cached report.
    pub fn discard(&self) {
        *self.instance.lock().expect("unit instance mutex poisoned") = None;
        *self.cached.lock().expect("report cache mutex poisoned") = None;
    }
}

/// Structural half of a node.
pub(crate) struct Node {
    pub parent: Option<NodeId>,
    pub children: BTreeMap<String, NodeId>,
    /// Stamp of the last structural change anywhere in this subtree.
    pub generation: u64,
    pub runtime: Arc<NodeRuntime>,
}

#[derive(Default)]
pub(crate) struct Arena {
    nodes: Vec<Option<Node>>,
    clock: u64,
}

impl Arena {
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(|n| n.as_ref())
    }

    pub fn runtime(&self, id: NodeId) -> Option<Arc<NodeRuntime>> {
        self.get(id).map(|n| n.runtime.clone())
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent)
    }

    pub fn child_named(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.get(parent).and_then(|n| n.children.get(name).copied())
    }

    pub fn spec(&self, id: NodeId) -> Option<&UnitSpec> {
        self.get(id).map(|n| &n.runtime.spec)
    }

    pub fn generation(&self, id: NodeId) -> u64 {
        self.get(id).map(|n| n.generation).unwrap_or_default()
    }

    /// Insert a node; `parent` must exist unless this is the root.
    ///
    /// Generations are left alone: the caller touches the parent once the
    /// registration is accepted, so an insert undone by [`Arena::pop`] leaves
    /// no trace.
    pub fn insert(&mut self, parent: Option<NodeId>, spec: UnitSpec, factory: UnitFactory) -> NodeId {
        let id = NodeId(self.nodes.len());
        let path = match parent.and_then(|p| self.get(p)) {
            Some(p) => format!("{}/{}", p.runtime.path, spec.name),
            None => spec.name.clone(),
        };
        let name = spec.name.clone();
        let runtime = Arc::new(NodeRuntime::new(id, spec, path, factory));
        self.nodes.push(Some(Node {
            parent,
            children: BTreeMap::new(),
            generation: 0,
            runtime,
        }));
        if let Some(p) = parent {
            if let Some(Some(node)) = self.nodes.get_mut(p.0) {
                node.children.insert(name, id);
            }
        }
        id
    }

    /// Undo the most recent `insert`, which must have produced `id`.
    pub fn pop(&mut self, id: NodeId) {
        if id.0 + 1 != self.nodes.len() {
            return;
        }
        if let Some(Some(node)) = self.nodes.pop() {
            if let Some(p) = node.parent {
                if let Some(Some(parent)) = self.nodes.get_mut(p.0) {
                    parent.children.remove(node.runtime.name());
                }
            }
        }
    }

    /// Detach and drop `id` and its whole subtree.
    pub fn remove(&mut self, id: NodeId) {
        let doomed = self.subtree(id);
        if let Some(p) = self.parent_of(id) {
            let name = self.get(id).map(|n| n.runtime.name().to_string());
            if let (Some(Some(parent)), Some(name)) = (self.nodes.get_mut(p.0), name) {
                parent.children.remove(&name);
            }
            self.touch(p);
        }
        for d in doomed {
            if let Some(slot) = self.nodes.get_mut(d.0) {
                *slot = None;
            }
        }
    }

    /// Stamp `id` and all its ancestors with a fresh generation.
    pub fn touch(&mut self, id: NodeId) {
        self.clock += 1;
        let stamp = self.clock;
        let mut cursor = Some(id);
        while let Some(c) = cursor {
            match self.nodes.get_mut(c.0) {
                Some(Some(node)) => {
                    node.generation = stamp;
                    cursor = node.parent;
                }
                _ => break,
            }
        }
    }

    /// `id` followed by all of its descendants, parents before children.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.get(current) {
                out.push(current);
                stack.extend(node.children.values().rev().copied());
            }
        }
        out
    }

    /// True when `ancestor` is a strict ancestor of `id`.
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut cursor = self.parent_of(id);
        while let Some(c) = cursor {
            if c == ancestor {
                return true;
            }
            cursor = self.parent_of(c);
        }
        false
    }

    /// True when `a` and `b` are the same node or one contains the other.
    pub fn overlaps(&self, a: NodeId, b: NodeId) -> bool {
        a == b || self.is_ancestor(a, b) || self.is_ancestor(b, a)
    }

    /// Children of `id` as `(priority, runtime)` pairs.
    pub fn children_of(&self, id: NodeId) -> Vec<(i32, Arc<NodeRuntime>)> {
        let Some(node) = self.get(id) else {
            return Vec::new();
        };
        node.children
            .values()
            .filter_map(|c| self.get(*c))
            .map(|c| (c.runtime.spec.priority, c.runtime.clone()))
            .collect()
    }

    pub fn find_path(&self, root: NodeId, path: &str) -> Option<NodeId> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let first = segments.next()?;
        let root_node = self.get(root)?;
        if root_node.runtime.name() != first {
            return None;
        }
        let mut cursor = root;
        for segment in segments {
            cursor = self.child_named(cursor, segment)?;
        }
        Some(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::Group;

    fn factory() -> UnitFactory {
        Arc::new(|| Unit::component(Group))
    }

    fn sample() -> (Arena, NodeId, NodeId, NodeId) {
        let mut arena = Arena::default();
        let root = arena.insert(None, UnitSpec::new("app"), factory());
        let http = arena.insert(Some(root), UnitSpec::new("http"), factory());
        let auth = arena.insert(Some(http), UnitSpec::new("auth"), factory());
        (arena, root, http, auth)
    }

    #[test]
    fn test_paths_and_lookup() {
        let (arena, root, _, auth) = sample();
        assert_eq!(arena.runtime(auth).unwrap().path, "app/http/auth");
        assert_eq!(arena.find_path(root, "app/http/auth"), Some(auth));
        assert_eq!(arena.find_path(root, "app/missing"), None);
        assert_eq!(arena.find_path(root, "other"), None);
    }

    #[test]
    fn test_ancestry() {
        let (arena, root, http, auth) = sample();
        assert!(arena.is_ancestor(root, auth));
        assert!(!arena.is_ancestor(auth, root));
        assert!(arena.overlaps(auth, http));
        assert_eq!(arena.subtree(http), vec![http, auth]);
    }

    #[test]
    fn test_generation_bubbles_to_ancestors() {
        let (mut arena, root, http, auth) = sample();
        let before_root = arena.generation(root);
        let before_http = arena.generation(http);
        arena.touch(auth);
        assert!(arena.generation(root) > before_root);
        assert!(arena.generation(http) > before_http);
    }

    #[test]
    fn test_pop_and_remove() {
        let (mut arena, root, http, auth) = sample();
        let before = arena.generation(root);
        let extra = arena.insert(Some(root), UnitSpec::new("extra"), factory());
        arena.pop(extra);
        assert!(arena.get(extra).is_none());
        assert!(arena.child_named(root, "extra").is_none());
        assert_eq!(arena.generation(root), before);

        arena.remove(http);
        assert!(arena.child_named(root, "http").is_none());
        assert!(arena.get(auth).is_none());
        assert!(arena.generation(root) > before);
    }

    #[test]
    fn test_instance_is_lazy_and_discardable() {
        let (arena, _, http, _) = sample();
        let runtime = arena.runtime(http).unwrap();
        assert!(runtime.existing_instance().is_none());
        assert_eq!(runtime.kind(), None);
        let _ = runtime.instance();
        assert_eq!(runtime.kind(), Some(UnitKind::Component));
        runtime.discard();
        assert!(runtime.existing_instance().is_none());
        assert_eq!(runtime.kind(), Some(UnitKind::Component));
    }
}
