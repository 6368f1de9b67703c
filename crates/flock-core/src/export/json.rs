// ABOUTME: Exports a full Snapshot as a pretty-printed JSON download.
// ABOUTME: The filename embeds the export date: congregation-backup-YYYY-MM-DD.json.

use chrono::NaiveDate;

use super::{ExportError, ExportFile};
use crate::snapshot::Snapshot;

pub const JSON_MIME: &str = "application/json";

/// Render the whole snapshot as pretty JSON.
pub fn to_json(snapshot: &Snapshot, date: NaiveDate) -> Result<ExportFile, ExportError> {
    let content = serde_json::to_string_pretty(snapshot)?;
    Ok(ExportFile {
        filename: format!("congregation-backup-{}.json", date.format("%Y-%m-%d")),
        content,
        mime_type: JSON_MIME.to_string(),
    })
}
