//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Detect enabled sources that would share a wave
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RuntimeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::BTreeMap;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::RuntimeConfig;
use crate::observability::logging::is_known_level;

/// One semantic problem, addressed by its TOML path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &RuntimeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.loader.dependency_timeout_ms == 0 {
        errors.push(ValidationError::new("loader.dependency_timeout_ms", "must be greater than 0"));
    }
    if config.loader.retry_base_delay_ms > config.loader.retry_max_delay_ms {
        errors.push(ValidationError::new(
            "loader.retry_base_delay_ms",
            "must not exceed retry_max_delay_ms",
        ));
    }

    let sources = &config.sources;
    if sources.file.enabled && sources.file.path.trim().is_empty() {
        errors.push(ValidationError::new("sources.file.path", "must not be empty"));
    }
    if sources.dotenv.enabled && sources.dotenv.path.trim().is_empty() {
        errors.push(ValidationError::new("sources.dotenv.path", "must not be empty"));
    }
    if sources.kv.enabled && sources.kv.separator.is_empty() {
        errors.push(ValidationError::new("sources.kv.separator", "must not be empty"));
    }

    let mut by_priority: BTreeMap<i32, Vec<&str>> = BTreeMap::new();
    for (name, priority) in sources.enabled() {
        by_priority.entry(priority).or_default().push(name);
    }
    for (priority, names) in by_priority {
        if names.len() > 1 {
            errors.push(ValidationError::new(
                "sources",
                format!("{} share priority {}", names.join(" and "), priority),
            ));
        }
    }

    let observability = &config.observability;
    if !is_known_level(&observability.log_level) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level {:?}", observability.log_level),
        ));
    }
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address {:?}", observability.metrics_address),
        ));
    }

    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                format!("invalid socket address {:?}", config.admin.bind_address),
            ));
        }
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    if config.watch.enabled && config.watch.poll_interval_ms == 0 {
        errors.push(ValidationError::new("watch.poll_interval_ms", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&RuntimeConfig::default()).is_ok());
    }

    #[test]
    fn test_shared_priority_rejected() {
        let mut config = RuntimeConfig::default();
        config.sources.dotenv.priority = 10;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "sources");
        assert!(errors[0].message.contains("share priority 10"));
    }

    #[test]
    fn test_admin_checked_only_when_enabled() {
        let mut config = RuntimeConfig::default();
        config.admin.bind_address = "not an address".to_string();
        assert!(validate_config(&config).is_ok());

        config.admin.enabled = true;
        config.admin.api_key.clear();
        let fields: Vec<String> = validate_config(&config)
            .unwrap_err()
            .into_iter()
            .map(|e| e.field)
            .collect();
        assert_eq!(fields, vec!["admin.bind_address", "admin.api_key"]);
    }

    #[test]
    fn test_empty_paths_rejected() {
        let mut config = RuntimeConfig::default();
        config.sources.file.path = " ".to_string();
        config.sources.dotenv.path.clear();
        assert_eq!(validate_config(&config).unwrap_err().len(), 2);
    }
}
