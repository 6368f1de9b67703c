// ABOUTME: Backup API handlers: create, list archived, restore from body or archive, and export.
// ABOUTME: Restores never wait on a running one; a concurrent restore gets 409.

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use flock_core::{
    BackupResponse, ExportFormat, Principal, RestoreMode, RestoreOutcome, Snapshot,
    SnapshotFormatError,
};
use flock_store::archive::{self, ArchiveEntry};
use flock_store::BackupError;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::{backup_error, error_response, status_for};
use crate::app_state::SharedState;

#[derive(Debug, Default, Deserialize)]
pub struct CreateBackupParams {
    #[serde(default)]
    pub archive: bool,
}

/// Body of a successful POST /api/backups.
#[derive(Debug, Serialize)]
pub struct CreateBackupResponse {
    pub success: bool,
    pub data: Snapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RestoreParams {
    pub mode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportParams {
    pub format: Option<String>,
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
}

/// POST /api/backups - Build a snapshot, optionally archiving it.
pub async fn create_backup(
    State(state): State<SharedState>,
    principal: Option<Extension<Principal>>,
    Query(params): Query<CreateBackupParams>,
) -> Response {
    let principal = principal.map(|Extension(p)| p);

    let snapshot = match state.service.backup(principal.as_ref()).await {
        Ok(snapshot) => snapshot,
        Err(e) => return backup_error(e),
    };

    let archive_id = if params.archive {
        match archive::save_backup(&state.storage.backups_dir(), &snapshot) {
            Ok(entry) => Some(entry.id.to_string()),
            Err(e) => return backup_error(e.into()),
        }
    } else {
        None
    };

    (
        StatusCode::OK,
        Json(CreateBackupResponse {
            success: true,
            data: snapshot,
            archive_id,
        }),
    )
        .into_response()
}

/// GET /api/backups - List archived backups, newest first.
pub async fn list_backups(
    State(state): State<SharedState>,
    principal: Option<Extension<Principal>>,
) -> Response {
    if principal.is_none() {
        return backup_error(BackupError::Unauthorized);
    }

    match archive::list_backups(&state.storage.backups_dir()) {
        Ok(entries) => (StatusCode::OK, Json(BackupResponse::<Vec<ArchiveEntry>>::ok(entries)))
            .into_response(),
        Err(e) => backup_error(e.into()),
    }
}

/// POST /api/backups/restore - Restore the snapshot in the request body.
pub async fn restore_backup(
    State(state): State<SharedState>,
    principal: Option<Extension<Principal>>,
    Query(params): Query<RestoreParams>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let principal = principal.map(|Extension(p)| p);
    if principal.is_none() {
        return backup_error(BackupError::Unauthorized);
    }

    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::warn!("restore body rejected: {}", rejection.body_text());
            return error_response(rejection.status(), rejection.body_text());
        }
    };

    let mode = match parse_mode(params.mode.as_deref()) {
        Ok(mode) => mode,
        Err(resp) => return resp,
    };

    let snapshot = match parse_snapshot(&body) {
        Ok(snapshot) => snapshot,
        Err(e) => return restore_failure(BackupError::Format(e)),
    };

    run_restore(&state, principal.as_ref(), &snapshot, mode).await
}

/// POST /api/backups/{id}/restore - Restore an archived backup.
pub async fn restore_archived(
    State(state): State<SharedState>,
    principal: Option<Extension<Principal>>,
    Path(id): Path<String>,
    Query(params): Query<RestoreParams>,
) -> Response {
    let principal = principal.map(|Extension(p)| p);
    if principal.is_none() {
        return backup_error(BackupError::Unauthorized);
    }

    let id: Ulid = match id.parse() {
        Ok(id) => id,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid backup id"),
    };
    let mode = match parse_mode(params.mode.as_deref()) {
        Ok(mode) => mode,
        Err(resp) => return resp,
    };

    let snapshot = match archive::load_backup(&state.storage.backups_dir(), &id) {
        Ok(snapshot) => snapshot,
        Err(e) => return restore_failure(e.into()),
    };

    tracing::info!("restoring archived backup {}", id);
    run_restore(&state, principal.as_ref(), &snapshot, mode).await
}

/// GET /api/backups/export - Download the current state as JSON or a CSV view.
pub async fn export_backup(
    State(state): State<SharedState>,
    principal: Option<Extension<Principal>>,
    Query(params): Query<ExportParams>,
) -> Response {
    let principal = principal.map(|Extension(p)| p);

    let format = match params.format.as_deref() {
        None => ExportFormat::Json,
        Some(raw) => match raw.parse::<ExportFormat>() {
            Ok(format) => format,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
        },
    };

    match state
        .service
        .export(principal.as_ref(), format, params.entity_type.as_deref())
        .await
    {
        Ok(file) => {
            let disposition = format!("attachment; filename=\"{}\"", file.filename);
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, file.mime_type),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                file.content,
            )
                .into_response()
        }
        Err(e) => backup_error(e),
    }
}

fn parse_mode(raw: Option<&str>) -> Result<Option<RestoreMode>, Response> {
    match raw.filter(|m| !m.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e: String| error_response(StatusCode::BAD_REQUEST, e)),
    }
}

fn parse_snapshot(body: &[u8]) -> Result<Snapshot, SnapshotFormatError> {
    let payload: serde_json::Value = serde_json::from_slice(body)?;
    Snapshot::from_value(payload)
}

async fn run_restore(
    state: &SharedState,
    principal: Option<&Principal>,
    snapshot: &Snapshot,
    mode: Option<RestoreMode>,
) -> Response {
    match state.service.try_restore(principal, snapshot, mode).await {
        Ok(report) => (StatusCode::OK, Json(RestoreOutcome::succeeded(report))).into_response(),
        Err(e) => restore_failure(e),
    }
}

/// A failed restore keeps the RestoreOutcome shape so per-entity reports survive.
fn restore_failure(err: BackupError) -> Response {
    let status = status_for(&err);
    let message = err.to_string();
    if status.is_server_error() {
        tracing::error!("restore failed: {}", message);
    } else {
        tracing::debug!("restore rejected ({}): {}", status, message);
    }
    (status, Json(RestoreOutcome::failed(message, err.into_report()))).into_response()
}
