//! Admin API.
//!
//! A small read-only JSON API on its own listener, guarded by a Bearer key.
//! Off unless `admin.enabled` is set.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;

use crate::accounting::StreamAccounting;
use crate::config::AdminConfig;
use crate::http::connection::RelayTracker;
use crate::http::server::AppState;
use crate::lifecycle::Shutdown;
use crate::upstream::UpstreamTarget;

use self::auth::admin_auth_middleware;
use self::handlers::{get_status, get_streams};

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub upstream: Arc<UpstreamTarget>,
    pub accounting: StreamAccounting,
    pub tracker: RelayTracker,
    pub started_at: std::time::Instant,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(app: &AppState, config: &AdminConfig) -> Self {
        Self {
            upstream: app.upstream.clone(),
            accounting: app.accounting.clone(),
            tracker: app.tracker.clone(),
            started_at: app.started_at,
            api_key: Arc::from(config.api_key.as_str()),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/streams", get(get_streams))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

/// Serve the admin API on `bind` until shutdown.
pub async fn serve(bind: &str, state: AdminState, shutdown: Shutdown) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");

    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
}
