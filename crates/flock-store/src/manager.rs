// ABOUTME: Storage manager for the flock home directory layout.
// ABOUTME: Owns the database path, the backups archive directory, and export file writing.

use std::fs;
use std::path::{Path, PathBuf};

use flock_core::ExportFile;
use thiserror::Error;

use crate::sqlite::SqliteStore;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid export filename: {0}")]
    InvalidFilename(String),
}

/// Layout:
///
/// ```text
/// <home>/flock.db
/// <home>/backups/backup_<ulid>.json
/// <home>/exports/<export filename>
/// ```
pub struct StorageManager {
    home: PathBuf,
}

impl StorageManager {
    /// Create a StorageManager rooted at `home`, creating the backups and
    /// exports subdirectories if they do not exist.
    pub fn new(home: PathBuf) -> Result<Self, ManagerError> {
        fs::create_dir_all(home.join("backups"))?;
        fs::create_dir_all(home.join("exports"))?;
        Ok(Self { home })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn db_path(&self) -> PathBuf {
        self.home.join("flock.db")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.home.join("backups")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.home.join("exports")
    }

    pub fn open_store(&self) -> Result<SqliteStore, ManagerError> {
        Ok(SqliteStore::open(&self.db_path())?)
    }

    /// Write an export into exports/ under its own filename.
    pub fn write_export(&self, file: &ExportFile) -> Result<PathBuf, ManagerError> {
        // Filenames come from the exporter, but never let one escape exports/
        let name = Path::new(&file.filename);
        if name.components().count() != 1 || name.file_name().is_none() {
            return Err(ManagerError::InvalidFilename(file.filename.clone()));
        }

        let dir = self.exports_dir();
        fs::create_dir_all(&dir)?;
        let path = dir.join(name);
        fs::write(&path, &file.content)?;
        tracing::info!("wrote export {}", path.display());
        Ok(path)
    }
}
