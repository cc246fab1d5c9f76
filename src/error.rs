//! Runtime error taxonomy.
//!
//! # Propagation
//! - Non-required unit failures are recorded in the report and never
//!   surface here
//! - `RequiredUnitFailed`, `Cancelled` and `RollbackFailed` abort the
//!   invocation they occur in and are returned to the host
//! - Everything else is returned directly by the operation that hit it

use thiserror::Error;

use crate::unit::{SourceError, UnitError, UnitState};

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Operation invalid in the unit's current state, or conflicting with a
    /// pending operation on an overlapping subtree.
    #[error("lifecycle violation on {unit}: cannot {operation} while {state} ({reason})")]
    LifecycleViolation {
        unit: String,
        operation: &'static str,
        state: UnitState,
        reason: String,
    },

    #[error("{unit} depends on {dependency}, which is not registered in scope")]
    DependencyMissing { unit: String, dependency: String },

    #[error("{unit} depends on {dependency}, which is {state}")]
    DependencyNotLoaded {
        unit: String,
        dependency: String,
        state: UnitState,
    },

    #[error("circular dependency: {}", path.join(" -> "))]
    CircularDependency { path: Vec<String> },

    #[error("config source {source_name} unavailable: {source}")]
    ConfigSourceUnavailable {
        source_name: String,
        #[source]
        source: SourceError,
    },

    #[error("required unit {unit} failed: {source}")]
    RequiredUnitFailed {
        unit: String,
        #[source]
        source: Box<RuntimeError>,
    },

    #[error("unit {unit} failed: {source}")]
    UnitFailed {
        unit: String,
        #[source]
        source: UnitError,
    },

    #[error("unit {unit} did not finish within {millis} ms")]
    Timeout { unit: String, millis: u64 },

    #[error("load of {unit} cancelled")]
    Cancelled { unit: String },

    #[error("rollback after `{cause}` left {} unit(s) behind: {}", failures.len(), failures.join(", "))]
    RollbackFailed {
        cause: Box<RuntimeError>,
        failures: Vec<String>,
    },

    #[error("unit not found: {0}")]
    UnitNotFound(String),

    #[error("{parent} already has a child named {name}")]
    DuplicateUnit { parent: String, name: String },

    #[error("invalid unit name {0:?}: names must be non-empty and contain no '/'")]
    InvalidUnitName(String),
}

impl RuntimeError {
    /// Errors that abort the whole invocation regardless of where they occur.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RuntimeError::RequiredUnitFailed { .. }
                | RuntimeError::Cancelled { .. }
                | RuntimeError::RollbackFailed { .. }
        )
    }

    pub(crate) fn violation(
        unit: &str,
        operation: &'static str,
        state: UnitState,
        reason: impl Into<String>,
    ) -> Self {
        RuntimeError::LifecycleViolation {
            unit: unit.to_string(),
            operation,
            state,
            reason: reason.into(),
        }
    }
}
