//! Pluggable module runtime library.
//!
//! Applications are trees of lifecycle units (services, middlewares,
//! components, utilities, config sources). A [`ModuleTree`] loads them in
//! priority waves, resolves named dependencies between them, and reports
//! per-unit outcomes; a [`ConfigurationAggregator`] merges layered
//! configuration sources into one effective tree the units read from.

// Core
pub mod error;
pub mod inject;
pub mod tree;
pub mod unit;

// Configuration
pub mod aggregator;
pub mod config;

// Host services
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use aggregator::{AggregatorUnit, ConfigStore, ConfigurationAggregator};
pub use config::RuntimeConfig;
pub use error::{RuntimeError, RuntimeResult};
pub use inject::{Binding, Dependencies, DependencyInjector};
pub use lifecycle::{CancellationToken, Shutdown};
pub use tree::{LoadReport, LoaderSettings, ModuleTree, NodeId, RepeatLoadPolicy, ReportEntry, UnitStatus};
pub use unit::{
    ConfigSource, Group, Leaf, SourceError, Unit, UnitContext, UnitError, UnitKind, UnitSpec, UnitState,
};
