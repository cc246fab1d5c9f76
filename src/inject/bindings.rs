//! Resolved dependency references.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::unit::{Leaf, Unit, UnitKind};

/// A reference to a loaded dependency.
#[derive(Clone)]
pub struct Binding {
    name: String,
    path: String,
    unit: Unit,
}

impl Binding {
    pub(crate) fn new(name: impl Into<String>, path: impl Into<String>, unit: Unit) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            unit,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tree path of the unit the name resolved to.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> UnitKind {
        self.unit.kind()
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    pub fn leaf(&self) -> Option<&Arc<dyn Leaf>> {
        self.unit.leaf()
    }

    /// The dependency as its concrete type, if it is a `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.unit.clone().into_any().downcast::<T>().ok()
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("kind", &self.unit.kind())
            .finish()
    }
}

/// The bindings installed into one unit, keyed by dependency name.
#[derive(Clone, Default, Debug)]
pub struct Dependencies {
    bindings: BTreeMap<String, Binding>,
}

impl Dependencies {
    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    /// Shorthand for `get(name)?.downcast::<T>()`.
    pub fn downcast<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.get(name).and_then(|b| b.downcast::<T>())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(|k| k.as_str())
    }

    pub(crate) fn insert(&mut self, binding: Binding) {
        self.bindings.insert(binding.name.clone(), binding);
    }
}
