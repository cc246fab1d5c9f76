//! Concrete configuration sources.
//!
//! | Source | Canonical name | Priority |
//! |---|---|---|
//! | [`FileSource`] | `FileConfigurationService` | 10 |
//! | [`KeyValueSource`] | `RedisConfigurationService` | 20 |
//! | [`DatabaseSource`] | `DatabaseConfigurationService` | 30 |
//! | [`DotEnvSource`] | `DotEnvConfigurationService` | 40 |

pub mod database;
pub mod dotenv;
pub mod file;
pub mod kv;

pub use database::{ConfigRow, ConfigTable, DatabaseSource, MemoryConfigTable};
pub use dotenv::{parse_dotenv, DotEnvSource};
pub use file::{FileFormat, FileSource};
pub use kv::{KeyValueBackend, KeyValueSource, MemoryKvStore};

pub const FILE_SOURCE: &str = "FileConfigurationService";
pub const KV_SOURCE: &str = "RedisConfigurationService";
pub const DATABASE_SOURCE: &str = "DatabaseConfigurationService";
pub const DOTENV_SOURCE: &str = "DotEnvConfigurationService";

pub const FILE_PRIORITY: i32 = 10;
pub const KV_PRIORITY: i32 = 20;
pub const DATABASE_PRIORITY: i32 = 30;
pub const DOTENV_PRIORITY: i32 = 40;
