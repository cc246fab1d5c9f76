//! Lifecycle units.
//!
//! # Data Flow
//! ```text
//! UnitSpec (static declaration: name, priority, dependencies, required)
//!     + factory registered with the tree
//!     → factory builds a Unit lazily, when the parent's load reaches it
//!     → Unit::{Service, Middleware, Component, Utility} → Leaf::load / Leaf::unload
//!     → Unit::ConfigSource                              → ConfigSource::fetch / release
//! ```
//!
//! # Design Decisions
//! - Closed set of variants; the loader dispatches on the enum
//! - Declarations exist before instances, so waves and dependency cycles are
//!   computed without constructing anything
//! - Lifecycle state lives beside the instance (tree node), never inside it

pub mod context;
pub mod error;
pub mod kind;
pub mod state;

use async_trait::async_trait;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;

pub use context::UnitContext;
pub use error::{SourceError, UnitError};
pub use kind::UnitKind;
pub use state::{StateCell, UnitState};

use crate::tree::LoadReport;

/// Upcast to `Any` so bindings can hand out concrete types.
pub trait AsAny: Any + Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Contract implemented by services, middlewares, components and utilities.
#[async_trait]
pub trait Leaf: AsAny {
    /// Invoked once per load, after every declared dependency is `Loaded`.
    async fn load(&self, ctx: UnitContext) -> Result<(), UnitError>;

    /// Inverse of `load`.
    async fn unload(&self) -> Result<(), UnitError>;

    /// Report produced by the leaf's own last load or unload.
    ///
    /// Leaves that drive units of their own (the configuration aggregator)
    /// return it here so it bubbles into the parent's report.
    fn report(&self) -> Option<LoadReport> {
        None
    }
}

/// Contract implemented by configuration providers.
#[async_trait]
pub trait ConfigSource: AsAny {
    /// Produce this source's configuration tree.
    async fn fetch(&self) -> Result<Value, SourceError>;

    /// Release whatever `fetch` acquired.
    async fn release(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

/// A constructed unit.
#[derive(Clone)]
pub enum Unit {
    Service(Arc<dyn Leaf>),
    Middleware(Arc<dyn Leaf>),
    Component(Arc<dyn Leaf>),
    Utility(Arc<dyn Leaf>),
    ConfigSource(Arc<dyn ConfigSource>),
}

impl Unit {
    pub fn service(leaf: impl Leaf) -> Self {
        Unit::Service(Arc::new(leaf))
    }

    pub fn middleware(leaf: impl Leaf) -> Self {
        Unit::Middleware(Arc::new(leaf))
    }

    pub fn component(leaf: impl Leaf) -> Self {
        Unit::Component(Arc::new(leaf))
    }

    pub fn utility(leaf: impl Leaf) -> Self {
        Unit::Utility(Arc::new(leaf))
    }

    pub fn config_source(source: impl ConfigSource) -> Self {
        Unit::ConfigSource(Arc::new(source))
    }

    pub fn kind(&self) -> UnitKind {
        match self {
            Unit::Service(_) => UnitKind::Service,
            Unit::Middleware(_) => UnitKind::Middleware,
            Unit::Component(_) => UnitKind::Component,
            Unit::Utility(_) => UnitKind::Utility,
            Unit::ConfigSource(_) => UnitKind::ConfigSource,
        }
    }

    /// The leaf behind this unit, `None` for config sources.
    pub fn leaf(&self) -> Option<&Arc<dyn Leaf>> {
        match self {
            Unit::Service(l) | Unit::Middleware(l) | Unit::Component(l) | Unit::Utility(l) => {
                Some(l)
            }
            Unit::ConfigSource(_) => None,
        }
    }

    pub fn into_any(self) -> Arc<dyn Any + Send + Sync> {
        match self {
            Unit::Service(l) | Unit::Middleware(l) | Unit::Component(l) | Unit::Utility(l) => {
                l.into_any()
            }
            Unit::ConfigSource(s) => s.into_any(),
        }
    }
}

/// Builds a fresh unit instance each time its node is loaded.
pub type UnitFactory = Arc<dyn Fn() -> Unit + Send + Sync>;

/// Static declaration of a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    /// Unique among siblings.
    pub name: String,

    /// Lower loads earlier; higher unloads earlier.
    pub priority: i32,

    /// Names that must be `Loaded` before this unit leaves `Loading`.
    pub dependencies: Vec<String>,

    /// A required unit's failure aborts and rolls back the whole load.
    pub required: bool,

    /// Extra fetch attempts for config sources.
    pub retries: u32,
}

impl UnitSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            dependencies: Vec::new(),
            required: false,
            retries: 0,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// A leaf that does nothing of its own; used for grouping nodes such as tree roots.
#[derive(Debug, Default, Clone, Copy)]
pub struct Group;

#[async_trait]
impl Leaf for Group {
    async fn load(&self, _ctx: UnitContext) -> Result<(), UnitError> {
        Ok(())
    }

    async fn unload(&self) -> Result<(), UnitError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_builder() {
        let spec = UnitSpec::new("http")
            .priority(20)
            .depends_on("database")
            .depends_on("sessions")
            .required();
        assert_eq!(spec.priority, 20);
        assert_eq!(spec.dependencies, vec!["database", "sessions"]);
        assert!(spec.required);
        assert_eq!(spec.retries, 0);
    }

    #[test]
    fn test_unit_kind_follows_variant() {
        assert_eq!(Unit::service(Group).kind(), UnitKind::Service);
        assert_eq!(Unit::utility(Group).kind(), UnitKind::Utility);
        assert!(Unit::middleware(Group).leaf().is_some());
    }

    #[test]
    fn test_into_any_keeps_concrete_type() {
        let any = Unit::component(Group).into_any();
        assert!(any.downcast::<Group>().is_ok());
    }
}
