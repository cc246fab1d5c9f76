//! Host configuration subsystem.
//!
//! # Data Flow
//! ```text
//! runtime.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RuntimeConfig (validated, immutable)
//!     → loader settings, source set, logging, metrics, admin
//!
//! While running:
//!     watcher.rs detects a change in a source file
//!     → host reloads the configuration aggregator
//!     → ConfigStore swaps in the new effective tree
//! ```
//!
//! # Design Decisions
//! - Host settings are read once; only source contents are hot-reloaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, DatabaseSourceConfig, DotEnvSourceConfig, FileSourceConfig, KvSourceConfig,
    LoaderConfig, ObservabilityConfig, RuntimeConfig, SourcesConfig, WatchConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
