//! Read-only admin interface.
//!
//! # Routes
//! - `GET /admin/status`: version, root state, unit counts
//! - `GET /admin/ready`: 200 once the root is `Loaded`, 503 otherwise
//! - `GET /admin/units`: every unit's status, parents first
//! - `GET /admin/units/{*path}`: one unit by tree path
//! - `GET /admin/config?key=a.b`: effective configuration value (whole tree without `key`)
//!
//! Every route requires `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::aggregator::ConfigStore;
use crate::tree::ModuleTree;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub tree: Arc<ModuleTree>,
    pub store: Arc<ConfigStore>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(tree: Arc<ModuleTree>, store: Arc<ConfigStore>, api_key: &str) -> Self {
        Self {
            tree,
            store,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/ready", get(get_ready))
        .route("/admin/units", get(get_units))
        .route("/admin/units/{*path}", get(get_unit))
        .route("/admin/config", get(get_config))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `router` until the shutdown channel fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin interface listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    tracing::info!("Admin interface stopped");
    Ok(())
}
