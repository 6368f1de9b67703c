// ABOUTME: Entity listing handler: every registered entity with its live record count.
// ABOUTME: Requires a principal like every other /api route.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use flock_core::{BackupResponse, Principal};

use super::backup_error;
use crate::app_state::SharedState;

/// GET /api/entities - Registry names and counts, in registry order.
pub async fn list_entities(
    State(state): State<SharedState>,
    principal: Option<Extension<Principal>>,
) -> Response {
    let principal = principal.map(|Extension(p)| p);
    match state.service.entity_counts(principal.as_ref()).await {
        Ok(counts) => (StatusCode::OK, Json(BackupResponse::ok(counts))).into_response(),
        Err(e) => backup_error(e),
    }
}
