// ABOUTME: Shared application state for the flock HTTP server.
// ABOUTME: Holds the BackupService and the storage manager for the archive and exports.

use std::sync::Arc;

use flock_store::{BackupService, StorageManager};

use crate::config::DEFAULT_MAX_RESTORE_BYTES;

/// Shared application state accessible by all Axum handlers.
pub struct AppState {
    pub service: BackupService,
    pub storage: StorageManager,
    /// Largest restore body the router will buffer.
    pub max_restore_bytes: usize,
}

/// Type alias for the Arc-wrapped state used with Axum's State extractor.
pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(service: BackupService, storage: StorageManager) -> Self {
        Self {
            service,
            storage,
            max_restore_bytes: DEFAULT_MAX_RESTORE_BYTES,
        }
    }

    pub fn with_max_restore_bytes(mut self, limit: usize) -> Self {
        self.max_restore_bytes = limit;
        self
    }
}
