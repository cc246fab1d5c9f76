//! Configuration schema definitions.
//!
//! This module defines the host settings: how the loader behaves, which
//! configuration sources the aggregator mounts, and the ambient services
//! (logging, metrics, admin interface, file watching). All types derive
//! Serde traits for deserialization from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::aggregator::sources::{DATABASE_PRIORITY, DOTENV_PRIORITY, FILE_PRIORITY, KV_PRIORITY};
use crate::observability::logging::LogFormat;
use crate::tree::{LoaderSettings, RepeatLoadPolicy};

/// Root configuration for the runtime host.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Loader timeouts and repeat-load policy.
    pub loader: LoaderConfig,

    /// Configuration sources merged by the aggregator.
    pub sources: SourcesConfig,

    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,

    /// Reload configuration when a source file changes.
    pub watch: WatchConfig,
}

/// Loader configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// How long a unit waits on a dependency that is still loading.
    pub dependency_timeout_ms: u64,

    /// Deadline for one unit's own load/unload; 0 disables it.
    pub unit_timeout_ms: u64,

    pub repeat_load: RepeatLoadPolicy,

    /// Backoff bounds between config source fetch retries.
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            dependency_timeout_ms: 30_000,
            unit_timeout_ms: 0,
            repeat_load: RepeatLoadPolicy::Idempotent,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2_000,
        }
    }
}

impl LoaderConfig {
    pub fn settings(&self) -> LoaderSettings {
        LoaderSettings {
            dependency_timeout: Duration::from_millis(self.dependency_timeout_ms),
            unit_timeout: (self.unit_timeout_ms > 0).then(|| Duration::from_millis(self.unit_timeout_ms)),
            repeat_load: self.repeat_load,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SourcesConfig {
    pub file: FileSourceConfig,
    pub kv: KvSourceConfig,
    pub database: DatabaseSourceConfig,
    pub dotenv: DotEnvSourceConfig,
}

impl SourcesConfig {
    /// Files whose change should trigger a configuration reload.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if self.file.enabled {
            paths.push(PathBuf::from(&self.file.path));
        }
        if self.kv.enabled {
            paths.extend(self.kv.snapshot.as_ref().map(PathBuf::from));
        }
        if self.database.enabled {
            paths.extend(self.database.rows.as_ref().map(PathBuf::from));
        }
        if self.dotenv.enabled {
            paths.push(PathBuf::from(&self.dotenv.path));
        }
        paths
    }

    /// `(name, priority)` of every enabled source.
    pub fn enabled(&self) -> Vec<(&'static str, i32)> {
        use crate::aggregator::sources::{DATABASE_SOURCE, DOTENV_SOURCE, FILE_SOURCE, KV_SOURCE};
        [
            (FILE_SOURCE, self.file.enabled, self.file.priority),
            (KV_SOURCE, self.kv.enabled, self.kv.priority),
            (DATABASE_SOURCE, self.database.enabled, self.database.priority),
            (DOTENV_SOURCE, self.dotenv.enabled, self.dotenv.priority),
        ]
        .into_iter()
        .filter(|(_, enabled, _)| *enabled)
        .map(|(name, _, priority)| (name, priority))
        .collect()
    }
}

/// TOML / JSON file source.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileSourceConfig {
    pub enabled: bool,
    pub path: String,
    /// Treat a missing file as empty instead of failing the source.
    pub optional: bool,
    pub priority: i32,
    /// A required source's failure aborts the whole configuration load.
    pub required: bool,
    /// Extra fetch attempts after the first.
    pub retries: u32,
}

impl Default for FileSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "config/app.toml".to_string(),
            optional: false,
            priority: FILE_PRIORITY,
            required: false,
            retries: 0,
        }
    }
}

/// Key-value store source.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KvSourceConfig {
    pub enabled: bool,
    /// JSON object file seeding the in-process store.
    pub snapshot: Option<String>,
    /// Only keys with this prefix are read; it is stripped.
    pub prefix: String,
    /// Splits keys into nested paths.
    pub separator: String,
    pub priority: i32,
    pub required: bool,
    pub retries: u32,
}

impl Default for KvSourceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            snapshot: None,
            prefix: String::new(),
            separator: ":".to_string(),
            priority: KV_PRIORITY,
            required: false,
            retries: 2,
        }
    }
}

/// Relational table source.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseSourceConfig {
    pub enabled: bool,
    /// JSON array of `{key, value}` rows seeding the in-process table.
    pub rows: Option<String>,
    pub priority: i32,
    pub required: bool,
    pub retries: u32,
}

impl Default for DatabaseSourceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rows: None,
            priority: DATABASE_PRIORITY,
            required: false,
            retries: 2,
        }
    }
}

/// `.env` file source.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DotEnvSourceConfig {
    pub enabled: bool,
    pub path: String,
    /// Only variables with this prefix are read; it is stripped.
    pub prefix: String,
    /// Also read prefixed variables from the process environment.
    pub include_process_env: bool,
    pub optional: bool,
    pub priority: i32,
    pub required: bool,
    pub retries: u32,
}

impl Default for DotEnvSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: ".env".to_string(),
            prefix: String::new(),
            include_process_env: false,
            optional: true,
            priority: DOTENV_PRIORITY,
            required: false,
            retries: 0,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Admin query interface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,
    /// Poll interval for the watcher backend; also debounces bursts of events.
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval_ms: 2_000,
        }
    }
}
