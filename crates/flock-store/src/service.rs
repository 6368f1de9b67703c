// ABOUTME: BackupService, the entry points for backup, restore, and export.
// ABOUTME: Serializes builds and restores behind one lock, and turns every error into a result envelope.

use std::sync::Arc;

use chrono::Utc;
use flock_core::export::{to_csv, to_json};
use flock_core::registry;
use flock_core::{
    BackupResponse, ExportFile, ExportFormat, Principal, RestoreMode, RestoreOutcome,
    RestoreReport, Snapshot,
};
use futures::future::try_join_all;
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::builder::build_snapshot;
use crate::error::BackupError;
use crate::restorer::restore_snapshot;
use crate::store::{EntityStore, handles};

/// Entity type exported when a CSV export names none.
pub const DEFAULT_CSV_TYPE: &str = registry::MEMBERS;

/// Live record count for one registered entity.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct EntityCount {
    pub name: &'static str,
    pub count: usize,
}

/// Backup, restore, and export over one entity store.
///
/// Builds and restores are single-flight: one lock is held for the whole
/// operation, so a build never observes a half-applied restore and two
/// restores never interleave.
pub struct BackupService {
    store: Arc<dyn EntityStore>,
    lock: Mutex<()>,
    default_mode: RestoreMode,
}

impl BackupService {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
            default_mode: RestoreMode::default(),
        }
    }

    pub fn with_default_mode(mut self, mode: RestoreMode) -> Self {
        self.default_mode = mode;
        self
    }

    pub fn default_mode(&self) -> RestoreMode {
        self.default_mode
    }

    pub fn store(&self) -> &dyn EntityStore {
        self.store.as_ref()
    }

    /// Build a snapshot of every entity, waiting for any running restore.
    pub async fn backup(&self, requester: Option<&Principal>) -> Result<Snapshot, BackupError> {
        let principal = requester.ok_or(BackupError::Unauthorized)?;
        let _guard = self.lock.lock().await;
        build_snapshot(self.store(), Some(principal))
            .instrument(tracing::info_span!("backup", requester = %principal.name))
            .await
    }

    /// Restore `snapshot`, waiting for any running build or restore to finish.
    pub async fn restore(
        &self,
        requester: Option<&Principal>,
        snapshot: &Snapshot,
        mode: Option<RestoreMode>,
    ) -> Result<RestoreReport, BackupError> {
        let principal = requester.ok_or(BackupError::Unauthorized)?;
        let _guard = self.lock.lock().await;
        self.run_restore(principal, snapshot, mode).await
    }

    /// Like `restore`, but fails with `Busy` instead of waiting.
    pub async fn try_restore(
        &self,
        requester: Option<&Principal>,
        snapshot: &Snapshot,
        mode: Option<RestoreMode>,
    ) -> Result<RestoreReport, BackupError> {
        let principal = requester.ok_or(BackupError::Unauthorized)?;
        let _guard = self.lock.try_lock().map_err(|_| BackupError::Busy)?;
        self.run_restore(principal, snapshot, mode).await
    }

    async fn run_restore(
        &self,
        principal: &Principal,
        snapshot: &Snapshot,
        mode: Option<RestoreMode>,
    ) -> Result<RestoreReport, BackupError> {
        let mode = mode.unwrap_or(self.default_mode);
        restore_snapshot(self.store(), snapshot, mode)
            .instrument(tracing::info_span!("restore", requester = %principal.name, %mode))
            .await
    }

    /// Build a snapshot and render it. CSV without an entity type exports members.
    pub async fn export(
        &self,
        requester: Option<&Principal>,
        format: ExportFormat,
        entity_type: Option<&str>,
    ) -> Result<ExportFile, BackupError> {
        let snapshot = self.backup(requester).await?;
        let today = Utc::now().date_naive();
        let file = match format {
            ExportFormat::Json => to_json(&snapshot, today)?,
            ExportFormat::Csv => to_csv(&snapshot, entity_type.unwrap_or(DEFAULT_CSV_TYPE), today)?,
        };
        tracing::info!("exported {} as {}", file.filename, format);
        Ok(file)
    }

    /// Live record counts for every registered entity, in registry order.
    pub async fn entity_counts(
        &self,
        requester: Option<&Principal>,
    ) -> Result<Vec<EntityCount>, BackupError> {
        requester.ok_or(BackupError::Unauthorized)?;
        let counts = handles(self.store()).map(|handle| async move {
            let count = handle.count().await.map_err(|source| BackupError::Read {
                entity: handle.name(),
                source,
            })?;
            Ok::<_, BackupError>(EntityCount {
                name: handle.name(),
                count,
            })
        });
        try_join_all(counts).await
    }

    /// `{success, data|error}` wrapper around `backup`.
    pub async fn create_backup(&self, requester: Option<&Principal>) -> BackupResponse<Snapshot> {
        match self.backup(requester).await {
            Ok(snapshot) => BackupResponse::ok(snapshot),
            Err(e) => {
                tracing::error!("backup failed: {}", e);
                BackupResponse::err(e)
            }
        }
    }

    /// Parse `payload` as a snapshot and restore it, waiting for the lock.
    ///
    /// Authorization is checked before the payload is even parsed.
    pub async fn restore_backup(
        &self,
        requester: Option<&Principal>,
        payload: serde_json::Value,
        mode: Option<RestoreMode>,
    ) -> RestoreOutcome {
        let result = match parse_payload(requester, payload) {
            Ok(snapshot) => self.restore(requester, &snapshot, mode).await,
            Err(e) => Err(e),
        };
        outcome(result)
    }

    /// Like `restore_backup`, but reports `Busy` instead of waiting.
    pub async fn try_restore_backup(
        &self,
        requester: Option<&Principal>,
        payload: serde_json::Value,
        mode: Option<RestoreMode>,
    ) -> RestoreOutcome {
        let result = match parse_payload(requester, payload) {
            Ok(snapshot) => self.try_restore(requester, &snapshot, mode).await,
            Err(e) => Err(e),
        };
        outcome(result)
    }

    /// `{success, data|error}` wrapper around `export`.
    pub async fn export_backup_file(
        &self,
        requester: Option<&Principal>,
        format: ExportFormat,
        entity_type: Option<&str>,
    ) -> BackupResponse<ExportFile> {
        match self.export(requester, format, entity_type).await {
            Ok(file) => BackupResponse::ok(file),
            Err(e) => {
                tracing::error!("export failed: {}", e);
                BackupResponse::err(e)
            }
        }
    }
}

fn parse_payload(
    requester: Option<&Principal>,
    payload: serde_json::Value,
) -> Result<Snapshot, BackupError> {
    requester.ok_or(BackupError::Unauthorized)?;
    Ok(Snapshot::from_value(payload)?)
}

fn outcome(result: Result<RestoreReport, BackupError>) -> RestoreOutcome {
    match result {
        Ok(report) => RestoreOutcome::succeeded(report),
        Err(e) => {
            let message = e.to_string();
            tracing::error!("restore failed: {}", message);
            RestoreOutcome::failed(message, e.into_report())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteStore;
    use crate::store::{InsertOptions, Slot};
    use crate::testing::{FaultyStore, Op};
    use flock_core::EntityData;
    use serde_json::json;
    use std::time::Duration;

    fn admin() -> Principal {
        Principal::new("admin")
    }

    async fn seeded() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_many(
                "members",
                Slot::Live,
                vec![json!({
                    "fullName": "Jane Doe",
                    "email": "j@x.com",
                    "phone": "555-1234",
                    "gender": "female",
                    "pioneerStatus": "regular",
                    "address": "1 Main St"
                })],
                InsertOptions::RESTORE,
            )
            .await
            .unwrap();
        store
    }

    fn snapshot_with_members(tag: &str, n: usize) -> Snapshot {
        let mut data = EntityData::new();
        data.insert(
            "members",
            (0..n).map(|i| json!({"fullName": format!("{tag}-{i}")})).collect(),
        );
        data.insert(
            "groups",
            (0..n).map(|i| json!({"name": format!("{tag}-{i}")})).collect(),
        );
        Snapshot::assemble(data, "admin", Utc::now())
    }

    #[tokio::test]
    async fn create_backup_without_requester_is_unauthorized() {
        let store = Arc::new(FaultyStore::new(seeded().await));
        let service = BackupService::new(store.clone());

        let resp = service.create_backup(None).await;

        assert!(!resp.success);
        assert!(resp.data.is_none());
        assert_eq!(resp.error.as_deref(), Some("Unauthorized"));
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn create_backup_wraps_snapshot() {
        let service = BackupService::new(Arc::new(seeded().await));

        let resp = service.create_backup(Some(&admin())).await;

        assert!(resp.success);
        let snap = resp.into_result().unwrap();
        assert_eq!(snap.metadata().total_members, 1);
        assert_eq!(snap.metadata().created_by, "admin");
    }

    #[tokio::test]
    async fn create_backup_reports_store_failure() {
        let store = FaultyStore::new(seeded().await);
        store.fail(Op::FindAll, "groups");
        let service = BackupService::new(Arc::new(store));

        let resp = service.create_backup(Some(&admin())).await;

        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("groups"));
    }

    #[tokio::test]
    async fn restore_without_requester_touches_nothing() {
        let store = Arc::new(FaultyStore::new(seeded().await));
        let service = BackupService::new(store.clone());
        let payload = serde_json::to_value(snapshot_with_members("x", 2)).unwrap();

        let outcome = service.restore_backup(None, payload, None).await;

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("Unauthorized"));
        assert_eq!(store.calls(), 0);
        assert_eq!(store.inner().count("members").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn restore_backup_applies_payload() {
        let service = BackupService::new(Arc::new(seeded().await));
        let payload = serde_json::to_value(snapshot_with_members("new", 3)).unwrap();

        let outcome = service.restore_backup(Some(&admin()), payload, None).await;

        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.mode, Some(RestoreMode::Staged));
        assert_eq!(service.store().count("members").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn restore_backup_rejects_unsupported_version() {
        let service = BackupService::new(Arc::new(seeded().await));
        let payload = json!({"version": "9.9", "data": {}});

        let outcome = service.restore_backup(Some(&admin()), payload, None).await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("9.9"));
        assert_eq!(service.store().count("members").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn restore_backup_rejects_payload_without_data() {
        let store = Arc::new(FaultyStore::new(seeded().await));
        let service = BackupService::new(store.clone());

        for payload in [json!({}), json!({"success": true, "snapshot": {}})] {
            let outcome = service.restore_backup(Some(&admin()), payload, None).await;
            assert!(!outcome.success);
            assert!(outcome.error.is_some());
        }

        assert_eq!(store.calls(), 0);
        assert_eq!(store.inner().count("members").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn default_mode_applies_when_none_requested() {
        let service =
            BackupService::new(Arc::new(seeded().await)).with_default_mode(RestoreMode::InPlace);
        let payload = serde_json::to_value(snapshot_with_members("m", 1)).unwrap();

        let outcome = service.restore_backup(Some(&admin()), payload, None).await;

        assert_eq!(outcome.mode, Some(RestoreMode::InPlace));
    }

    #[tokio::test]
    async fn failed_restore_outcome_lists_entities() {
        let store = FaultyStore::new(seeded().await);
        store.fail_in(Op::InsertMany, Slot::Shadow, "groups");
        let service = BackupService::new(Arc::new(store));
        let payload = serde_json::to_value(snapshot_with_members("g", 2)).unwrap();

        let outcome = service.restore_backup(Some(&admin()), payload, None).await;

        assert!(!outcome.success);
        let groups = outcome.entities.iter().find(|e| e.name == "groups").unwrap();
        assert!(groups.error.is_some());
    }

    #[tokio::test]
    async fn try_restore_is_busy_while_another_runs() {
        let store = FaultyStore::new(SqliteStore::open_in_memory().unwrap())
            .with_delay(Duration::from_millis(50));
        let service = Arc::new(BackupService::new(Arc::new(store)));
        let snap = snapshot_with_members("a", 2);

        let running = {
            let service = service.clone();
            let snap = snap.clone();
            tokio::spawn(async move { service.restore(Some(&admin()), &snap, None).await })
        };
        // Let the spawned restore take the lock
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = service
            .try_restore(Some(&admin()), &snap, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Busy));

        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn concurrent_restores_never_interleave() {
        let store = FaultyStore::new(SqliteStore::open_in_memory().unwrap())
            .with_delay(Duration::from_millis(1));
        let service = Arc::new(BackupService::new(Arc::new(store)));
        let a = snapshot_with_members("a", 3);
        let b = snapshot_with_members("b", 5);
        let who = admin();

        let (ra, rb) = tokio::join!(
            service.restore(Some(&who), &a, Some(RestoreMode::InPlace)),
            service.restore(Some(&who), &b, Some(RestoreMode::InPlace)),
        );
        ra.unwrap();
        rb.unwrap();

        let members = service.store().find_all("members").await.unwrap();
        let groups = service.store().find_all("groups").await.unwrap();
        let matches_a = members == a.records("members") && groups == a.records("groups");
        let matches_b = members == b.records("members") && groups == b.records("groups");
        assert!(matches_a || matches_b, "state mixes two snapshots");
    }

    #[tokio::test]
    async fn export_csv_defaults_to_members() {
        let service = BackupService::new(Arc::new(seeded().await));

        let resp = service
            .export_backup_file(Some(&admin()), ExportFormat::Csv, None)
            .await;

        let file = resp.into_result().unwrap();
        assert!(file.filename.starts_with("congregation-members-"));
        assert_eq!(file.mime_type, "text/csv");
        assert!(file.content.contains(
            "\"Jane Doe\",\"j@x.com\",\"555-1234\",\"female\",\"\",\"regular\",\"1 Main St\""
        ));
    }

    #[tokio::test]
    async fn export_json_is_the_full_snapshot() {
        let service = BackupService::new(Arc::new(seeded().await));

        let file = service
            .export(Some(&admin()), ExportFormat::Json, None)
            .await
            .unwrap();

        let parsed = Snapshot::from_json(&file.content).unwrap();
        assert_eq!(parsed.records("members").len(), 1);
        assert_eq!(file.mime_type, "application/json");
    }

    #[tokio::test]
    async fn export_propagates_unauthorized() {
        let service = BackupService::new(Arc::new(seeded().await));

        let resp = service.export_backup_file(None, ExportFormat::Json, None).await;

        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("Unauthorized"));
    }

    #[tokio::test]
    async fn entity_counts_follow_registry_order() {
        let service = BackupService::new(Arc::new(seeded().await));

        let counts = service.entity_counts(Some(&admin())).await.unwrap();

        assert_eq!(counts.len(), registry::list().len());
        assert_eq!(counts[0], EntityCount { name: "members", count: 1 });
        assert_eq!(counts[1].count, 0);
    }
}
