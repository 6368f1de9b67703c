// ABOUTME: Error taxonomy for snapshot build, restore, and export orchestration.
// ABOUTME: Display strings double as the user-visible `error` field of result envelopes.

use flock_core::{ExportError, RestoreReport, SnapshotFormatError};
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("a backup or restore is already in progress")]
    Busy,

    #[error("failed to read {entity}: {source}")]
    Read {
        entity: &'static str,
        #[source]
        source: StoreError,
    },

    /// One or more entities failed during restore. The report says which.
    #[error("{summary}")]
    Restore {
        summary: String,
        report: RestoreReport,
    },

    #[error("failed to promote staged restore: {source}")]
    Promote {
        #[source]
        source: StoreError,
        report: RestoreReport,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid snapshot: {0}")]
    Format(#[from] SnapshotFormatError),

    #[error("export failed: {0}")]
    Export(#[from] ExportError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
}

impl BackupError {
    /// The per-entity report attached to a failed restore, if any.
    pub fn report(&self) -> Option<&RestoreReport> {
        match self {
            BackupError::Restore { report, .. } | BackupError::Promote { report, .. } => {
                Some(report)
            }
            _ => None,
        }
    }

    pub fn into_report(self) -> Option<RestoreReport> {
        match self {
            BackupError::Restore { report, .. } | BackupError::Promote { report, .. } => {
                Some(report)
            }
            _ => None,
        }
    }
}
