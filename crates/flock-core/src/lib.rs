// ABOUTME: Core library for flock, holding the entity registry and the snapshot data model.
// ABOUTME: Pure data and formatting; all store I/O lives in flock-store.

pub mod export;
pub mod legacy;
pub mod outcome;
pub mod principal;
pub mod registry;
pub mod snapshot;

pub use export::{ExportError, ExportFile, ExportFormat};
pub use outcome::{BackupResponse, EntityReport, RestoreMode, RestoreOutcome, RestoreReport};
pub use principal::Principal;
pub use registry::RegistryEntry;
pub use snapshot::{
    CURRENT_VERSION, EntityData, LEGACY_VERSION, Record, Snapshot, SnapshotFormatError,
    SnapshotMetadata,
};
