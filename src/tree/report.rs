//! Load/unload reports.
//!
//! A report is an ordered list of `{ "type": ..., "status": { name: bool } }`
//! entries. One tree level contributes one entry per unit kind (in order of
//! first appearance across its waves); nested levels are appended after it as
//! the recursion returns.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-kind outcome of one tree level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: BTreeMap<String, bool>,
}

/// Structured result of a load or unload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoadReport {
    entries: Vec<ReportEntry>,
}

impl LoadReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append another report's entries after this one's.
    pub fn extend(&mut self, other: LoadReport) {
        self.entries.extend(other.entries);
    }

    /// Record one unit's outcome, merging into the last entry of the same kind.
    pub fn record(&mut self, kind: &str, name: &str, ok: bool) {
        match self.entries.iter_mut().find(|e| e.kind == kind) {
            Some(entry) => {
                entry.status.insert(name.to_string(), ok);
            }
            None => {
                let mut status = BTreeMap::new();
                status.insert(name.to_string(), ok);
                self.entries.push(ReportEntry {
                    kind: kind.to_string(),
                    status,
                });
            }
        }
    }

    /// First recorded outcome for `name`, searching entries in order.
    pub fn status_of(&self, name: &str) -> Option<bool> {
        self.entries.iter().find_map(|e| e.status.get(name).copied())
    }

    pub fn all_succeeded(&self) -> bool {
        self.entries.iter().all(|e| e.status.values().all(|ok| *ok))
    }

    /// Names of every unit recorded as failed.
    pub fn failures(&self) -> Vec<&str> {
        self.entries
            .iter()
            .flat_map(|e| e.status.iter())
            .filter(|(_, ok)| !**ok)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
