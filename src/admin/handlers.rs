use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::AdminState;
use crate::tree::UnitStatus;
use crate::unit::UnitState;

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    /// `operational` when nothing is `Failed`, else `degraded`.
    pub status: String,
    pub root: UnitState,
    pub units: usize,
    pub loaded: usize,
    pub failed: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: bool,
    pub state: UnitState,
}

#[derive(Debug, Deserialize)]
pub struct ConfigQuery {
    pub key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigValue {
    pub key: String,
    pub value: Value,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let statuses = state.tree.statuses();
    let failed: Vec<String> = statuses
        .iter()
        .filter(|s| s.state == UnitState::Failed)
        .map(|s| s.path.clone())
        .collect();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: if failed.is_empty() { "operational" } else { "degraded" }.to_string(),
        root: state.tree.state(state.tree.root()).unwrap_or(UnitState::Unloaded),
        units: statuses.len(),
        loaded: statuses.iter().filter(|s| s.state == UnitState::Loaded).count(),
        failed,
    })
}

pub async fn get_ready(State(state): State<AdminState>) -> (StatusCode, Json<Readiness>) {
    let root = state.tree.state(state.tree.root()).unwrap_or(UnitState::Unloaded);
    let ready = root == UnitState::Loaded;
    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(Readiness { ready, state: root }))
}

pub async fn get_units(State(state): State<AdminState>) -> Json<Vec<UnitStatus>> {
    Json(state.tree.statuses())
}

pub async fn get_unit(
    State(state): State<AdminState>,
    Path(path): Path<String>,
) -> Result<Json<UnitStatus>, StatusCode> {
    state
        .tree
        .find(&path)
        .and_then(|id| state.tree.status(id))
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn get_config(
    State(state): State<AdminState>,
    Query(query): Query<ConfigQuery>,
) -> Result<Json<ConfigValue>, StatusCode> {
    let key = query.key.unwrap_or_default();
    let value = if key.is_empty() {
        Some((*state.store.snapshot()).clone())
    } else {
        state.store.get(&key)
    };
    value
        .map(|value| Json(ConfigValue { key, value }))
        .ok_or(StatusCode::NOT_FOUND)
}
