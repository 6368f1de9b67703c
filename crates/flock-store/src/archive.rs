// ABOUTME: On-disk archive of snapshot files, one `backup_<ulid>.json` per backup.
// ABOUTME: Writes are atomic (tmp, fsync, rename); ULIDs sort archives by creation time.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flock_core::{Snapshot, SnapshotFormatError};
use serde::Serialize;
use thiserror::Error;
use ulid::Ulid;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("archived snapshot is invalid: {0}")]
    Format(#[from] SnapshotFormatError),

    #[error("backup {0} not found")]
    NotFound(Ulid),
}

/// One archived snapshot file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    pub id: Ulid,
    #[serde(skip)]
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

fn file_name(id: &Ulid) -> String {
    format!("backup_{}.json", id)
}

fn parse_file_name(name: &str) -> Option<Ulid> {
    name.strip_prefix("backup_")?
        .strip_suffix(".json")?
        .parse::<Ulid>()
        .ok()
}

/// Save a snapshot into `dir` under a fresh ULID.
/// Creates the directory if it does not exist.
pub fn save_backup(dir: &Path, snapshot: &Snapshot) -> Result<ArchiveEntry, ArchiveError> {
    fs::create_dir_all(dir)?;

    let id = Ulid::new();
    let tmp_path = dir.join(format!("backup_{}.tmp", id));
    let final_path = dir.join(file_name(&id));

    let json = serde_json::to_string_pretty(snapshot)?;

    let mut file = File::create(&tmp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, &final_path)?;

    tracing::info!("archived backup {} ({} bytes)", id, json.len());

    Ok(ArchiveEntry {
        id,
        path: final_path,
        created_at: DateTime::<Utc>::from(id.datetime()),
        size_bytes: json.len() as u64,
    })
}

/// All archived backups in `dir`, newest first.
/// Returns an empty list if the directory does not exist.
pub fn list_backups(dir: &Path) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();

        match parse_file_name(&name_str) {
            Some(id) => entries.push(ArchiveEntry {
                id,
                path: entry.path(),
                created_at: DateTime::<Utc>::from(id.datetime()),
                size_bytes: entry.metadata()?.len(),
            }),
            None if name_str.ends_with(".tmp") => {
                tracing::debug!("ignoring incomplete archive {}", name_str);
            }
            None => {
                tracing::warn!("skipping unrecognised file in backups/: {}", name_str);
            }
        }
    }

    entries.sort_by(|a, b| b.id.cmp(&a.id));
    Ok(entries)
}

/// Load the archived backup with the given id.
pub fn load_backup(dir: &Path, id: &Ulid) -> Result<Snapshot, ArchiveError> {
    let path = dir.join(file_name(id));
    if !path.exists() {
        return Err(ArchiveError::NotFound(*id));
    }
    let contents = fs::read_to_string(&path)?;
    Ok(Snapshot::from_json(&contents)?)
}

/// Load the most recent archived backup, if any.
pub fn load_latest_backup(dir: &Path) -> Result<Option<(ArchiveEntry, Snapshot)>, ArchiveError> {
    match list_backups(dir)?.into_iter().next() {
        Some(entry) => {
            let snapshot = load_backup(dir, &entry.id)?;
            Ok(Some((entry, snapshot)))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flock_core::EntityData;
    use serde_json::json;
    use tempfile::TempDir;

    fn make_snapshot(members: usize) -> Snapshot {
        let mut data = EntityData::new();
        data.insert(
            "members",
            (0..members).map(|i| json!({"fullName": format!("M{i}")})).collect(),
        );
        Snapshot::assemble(data, "admin", Utc::now())
    }

    #[test]
    fn archive_round_trip() {
        let dir = TempDir::new().unwrap();
        let snap = make_snapshot(3);

        let entry = save_backup(dir.path(), &snap).unwrap();
        assert!(entry.path.ends_with(format!("backup_{}.json", entry.id)));
        assert!(entry.size_bytes > 0);

        let loaded = load_backup(dir.path(), &entry.id).unwrap();
        assert_eq!(loaded.records("members"), snap.records("members"));
        assert_eq!(loaded.metadata(), snap.metadata());
    }

    #[test]
    fn list_is_newest_first_and_latest_matches() {
        let dir = TempDir::new().unwrap();

        let first = save_backup(dir.path(), &make_snapshot(1)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = save_backup(dir.path(), &make_snapshot(2)).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let ids: Vec<Ulid> = list_backups(dir.path()).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);

        let (entry, latest) = load_latest_backup(dir.path()).unwrap().expect("has backups");
        assert_eq!(entry.id, second.id);
        assert_eq!(latest.records("members").len(), 2);
    }

    #[test]
    fn missing_dir_lists_nothing() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");

        assert!(list_backups(&missing).unwrap().is_empty());
        assert!(load_latest_backup(&missing).unwrap().is_none());
    }

    #[test]
    fn unknown_id_is_not_found() {
        let dir = TempDir::new().unwrap();
        let id = Ulid::new();

        let err = load_backup(dir.path(), &id).unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound(missing) if missing == id));
    }

    #[test]
    fn save_creates_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("deep").join("backups");

        let entry = save_backup(&nested, &make_snapshot(0)).unwrap();

        assert!(nested.join(format!("backup_{}.json", entry.id)).exists());
    }
}
