//! Unit lifecycle state machine.
//!
//! # States
//! - Unloaded: initial state, and the state a reset or teardown returns to
//! - Loading: dependencies binding, own load and children waves in flight
//! - Loaded: terminal success
//! - Unloading: children waves and own unload in flight
//! - Failed: terminal error, left only through an explicit reset
//!
//! # State Transitions
//! ```text
//! Unloaded  → Loading    load requested
//! Loading   → Loaded     dependencies, own load and required children resolved
//! Loading   → Failed     dependency unresolved, own load failed, required child failed
//! Loading   → Unloaded   load cancelled, results discarded
//! Loaded    → Unloading  unload requested
//! Unloading → Unloaded
//! Unloading → Failed
//! Failed    → Unloaded   explicit reset
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;

/// Lifecycle state of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
    Failed,
}

impl UnitState {
    /// Whether the transition table allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: UnitState) -> bool {
        use UnitState::*;
        matches!(
            (self, next),
            (Unloaded, Loading)
                | (Loading, Loaded)
                | (Loading, Failed)
                | (Loading, Unloaded)
                | (Loaded, Unloading)
                | (Unloading, Unloaded)
                | (Unloading, Failed)
                | (Failed, Unloaded)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitState::Unloaded => "unloaded",
            UnitState::Loading => "loading",
            UnitState::Loaded => "loaded",
            UnitState::Unloading => "unloading",
            UnitState::Failed => "failed",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, observable state of one unit.
///
/// Transitions are checked against the table above and applied atomically;
/// waiters (dependency resolution) are woken on every change.
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<UnitState>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(UnitState::Unloaded);
        Self { tx }
    }

    /// Current state.
    pub fn get(&self) -> UnitState {
        *self.tx.borrow()
    }

    /// Move from `from` to `to`.
    ///
    /// Fails with the observed state if the cell is not in `from` or the
    /// transition table forbids the move.
    pub fn transition(&self, from: UnitState, to: UnitState) -> Result<(), UnitState> {
        let mut observed = from;
        let changed = self.tx.send_if_modified(|current| {
            observed = *current;
            if *current == from && from.can_transition_to(to) {
                *current = to;
                true
            } else {
                false
            }
        });
        if changed {
            Ok(())
        } else {
            Err(observed)
        }
    }

    /// Wait until the state leaves `Loading`, for at most `limit`.
    ///
    /// Returns the state observed when waiting ended, which is still
    /// `Loading` if the limit elapsed.
    pub async fn settle(&self, limit: Duration) -> UnitState {
        let mut rx = self.tx.subscribe();
        let waited = tokio::time::timeout(limit, async {
            match rx.wait_for(|s| *s != UnitState::Loading).await {
                Ok(state) => *state,
                Err(_) => UnitState::Loading,
            }
        })
        .await;
        waited.unwrap_or(UnitState::Loading)
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
