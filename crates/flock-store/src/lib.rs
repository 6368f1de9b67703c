// ABOUTME: Persistence and orchestration for flock: entity stores, snapshot build, restore, and archive.
// ABOUTME: BackupService is the single entry point used by the HTTP server and the CLI.

pub mod archive;
pub mod builder;
pub mod error;
pub mod manager;
pub mod restorer;
pub mod service;
pub mod sqlite;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use archive::{ArchiveEntry, ArchiveError};
pub use builder::build_snapshot;
pub use error::BackupError;
pub use manager::{ManagerError, StorageManager};
pub use restorer::restore_snapshot;
pub use service::{BackupService, EntityCount};
pub use sqlite::SqliteStore;
pub use store::{EntityStore, InsertOptions, InsertSummary, Slot, StoreError};
