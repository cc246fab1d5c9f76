//! What a leaf receives when it is loaded.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::inject::{Binding, Dependencies};
use crate::unit::UnitError;

/// Load-time context handed to [`Leaf::load`](crate::unit::Leaf::load).
#[derive(Clone)]
pub struct UnitContext {
    name: String,
    path: String,
    dependencies: Dependencies,
    config: Value,
    snapshot: Arc<Value>,
}

impl UnitContext {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        dependencies: Dependencies,
        config: Value,
        snapshot: Arc<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            dependencies,
            config,
            snapshot,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slash-separated path from the tree root, e.g. `app/http/auth`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }

    pub fn dependency(&self, name: &str) -> Option<&Binding> {
        self.dependencies.get(name)
    }

    /// The effective configuration subtree keyed by this unit's name,
    /// `Null` when the effective configuration has no such key.
    pub fn config(&self) -> &Value {
        &self.config
    }

    /// Deserialize the unit's configuration slice.
    pub fn config_as<T: DeserializeOwned>(&self) -> Result<T, UnitError> {
        serde_json::from_value(self.config.clone())
            .map_err(|e| UnitError::Config(format!("{}: {}", self.name, e)))
    }

    /// The whole effective configuration at the time the unit was loaded.
    pub fn snapshot(&self) -> &Arc<Value> {
        &self.snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct HttpSlice {
        port: u16,
    }

    #[test]
    fn test_config_as() {
        let ctx = UnitContext::new(
            "http",
            "app/http",
            Dependencies::default(),
            serde_json::json!({ "port": 8080 }),
            Arc::new(Value::Null),
        );
        let slice: HttpSlice = ctx.config_as().unwrap();
        assert_eq!(slice.port, 8080);
    }

    #[test]
    fn test_config_as_reports_unit_name() {
        let ctx = UnitContext::new(
            "http",
            "app/http",
            Dependencies::default(),
            Value::Null,
            Arc::new(Value::Null),
        );
        let err = ctx.config_as::<HttpSlice>().err().unwrap();
        assert!(err.to_string().contains("http"));
    }
}
