// ABOUTME: Route definitions for the flock HTTP API.
// ABOUTME: Assembles backup, restore, export, and entity routes behind auth and request tracing.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::api;
use crate::app_state::SharedState;
use crate::auth::AuthLayer;

/// Build the complete Axum router with all routes and shared state.
pub fn create_router(state: SharedState, auth: AuthLayer) -> Router {
    // Full snapshots routinely exceed axum's 2 MB default
    let restore_limit = DefaultBodyLimit::max(state.max_restore_bytes);

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/backups",
            get(api::backups::list_backups).post(api::backups::create_backup),
        )
        .route(
            "/api/backups/restore",
            post(api::backups::restore_backup).layer(restore_limit),
        )
        .route("/api/backups/export", get(api::backups::export_backup))
        .route("/api/backups/{id}/restore", post(api::backups::restore_archived))
        .route("/api/entities", get(api::entities::list_entities))
        .layer(auth)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler. Returns 200 OK with a simple JSON body.
async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}
