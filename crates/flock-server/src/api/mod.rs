// ABOUTME: API module containing the HTTP handlers for the flock REST API.
// ABOUTME: Maps BackupError onto status codes while keeping the {success, error} envelope.

pub mod backups;
pub mod entities;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use flock_core::BackupResponse;
use flock_store::{ArchiveError, BackupError};

/// HTTP status for a failed backup operation.
pub(crate) fn status_for(err: &BackupError) -> StatusCode {
    match err {
        BackupError::Unauthorized => StatusCode::UNAUTHORIZED,
        BackupError::Busy => StatusCode::CONFLICT,
        BackupError::Format(_) => StatusCode::BAD_REQUEST,
        BackupError::Archive(ArchiveError::NotFound(_)) => StatusCode::NOT_FOUND,
        BackupError::Archive(ArchiveError::Format(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `{success: false, error}` with the given status.
pub(crate) fn error_response(status: StatusCode, error: impl std::fmt::Display) -> Response {
    let body: BackupResponse<()> = BackupResponse::err(error);
    (status, Json(body)).into_response()
}

pub(crate) fn backup_error(err: BackupError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!("request failed: {}", err);
    } else {
        tracing::debug!("request rejected ({}): {}", status, err);
    }
    error_response(status, err)
}
