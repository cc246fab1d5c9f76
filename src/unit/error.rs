//! Errors raised by leaf units and configuration sources.

use thiserror::Error;

/// Error a leaf returns from its own load or unload.
#[derive(Debug, Error)]
pub enum UnitError {
    /// A required resource was not ready.
    #[error("not ready: {0}")]
    NotReady(String),

    /// The unit's configuration slice was missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl UnitError {
    pub fn other(message: impl Into<String>) -> Self {
        UnitError::Other(message.into())
    }
}

/// Error a configuration source returns from `fetch` or `release`.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The backing store could not be reached.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The source content could not be turned into a configuration tree.
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<toml::de::Error> for SourceError {
    fn from(e: toml::de::Error) -> Self {
        SourceError::Parse(e.to_string())
    }
}

impl From<dotenvy::Error> for SourceError {
    fn from(e: dotenvy::Error) -> Self {
        match e {
            dotenvy::Error::Io(io) => SourceError::Io(io),
            other => SourceError::Parse(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Parse(e.to_string())
    }
}
