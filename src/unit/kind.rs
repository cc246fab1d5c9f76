//! Unit kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of unit kinds a module tree can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitKind {
    Service,
    Middleware,
    Component,
    Utility,
    ConfigSource,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Service => "service",
            UnitKind::Middleware => "middleware",
            UnitKind::Component => "component",
            UnitKind::Utility => "utility",
            UnitKind::ConfigSource => "config-source",
        }
    }

    /// Label used for this kind's entry in a [`LoadReport`](crate::tree::LoadReport).
    ///
    /// Config sources are configuration services and report under `services`.
    pub fn report_label(&self) -> &'static str {
        match self {
            UnitKind::Service | UnitKind::ConfigSource => "services",
            UnitKind::Middleware => "middlewares",
            UnitKind::Component => "components",
            UnitKind::Utility => "utilities",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_labels() {
        assert_eq!(UnitKind::Service.report_label(), "services");
        assert_eq!(UnitKind::ConfigSource.report_label(), "services");
        assert_eq!(UnitKind::Middleware.report_label(), "middlewares");
        assert_eq!(UnitKind::Utility.report_label(), "utilities");
    }

    #[test]
    fn test_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&UnitKind::ConfigSource).unwrap();
        assert_eq!(json, "\"config-source\"");
    }
}
