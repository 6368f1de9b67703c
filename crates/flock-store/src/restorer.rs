// ABOUTME: Replaces all entity state with the contents of a Snapshot.
// ABOUTME: Staged mode loads shadows and promotes atomically; in-place mode wipes then reloads live data.

use flock_core::legacy::{self, RecordSource};
use flock_core::registry;
use flock_core::{EntityReport, RestoreMode, RestoreReport, Snapshot};
use futures::future::join_all;

use crate::error::BackupError;
use crate::store::{CollectionHandle, EntityStore, InsertOptions, Slot, StoreError, handles};

/// One registered entity paired with the snapshot records destined for it.
struct Planned<'a> {
    handle: CollectionHandle<'a>,
    source: Option<RecordSource<'a>>,
}

impl Planned<'_> {
    fn report(&self) -> EntityReport {
        let expected = self.source.map_or(0, |s| s.records.len());
        let mut report = EntityReport::new(self.handle.name(), expected);
        if let Some(source) = self.source
            && source.is_shimmed_for(self.handle.name())
        {
            report.source_key = Some(source.key.to_string());
        }
        report
    }
}

fn plan<'a>(store: &'a dyn EntityStore, snapshot: &'a Snapshot) -> Vec<Planned<'a>> {
    for (key, _) in snapshot.data().iter() {
        let known = registry::lookup(key).is_some()
            || legacy::LEGACY_RENAMES.iter().any(|r| r.legacy == key);
        if !known {
            tracing::warn!("snapshot key {:?} is not a registered entity, ignoring", key);
        }
    }

    handles(store)
        .map(|handle| {
            let source = legacy::resolve(snapshot.data(), handle.name());
            if let Some(source) = source
                && source.is_shimmed_for(handle.name())
            {
                tracing::info!(
                    "loading legacy {:?} records into {}",
                    source.key,
                    handle.name()
                );
            }
            Planned { handle, source }
        })
        .collect()
}

/// Replace all persistent entity state with `snapshot`.
///
/// Entities absent from the snapshot, or present with no records, end up
/// empty without an insert being issued. On success every entity holds
/// exactly its snapshot records in snapshot order.
pub async fn restore_snapshot(
    store: &dyn EntityStore,
    snapshot: &Snapshot,
    mode: RestoreMode,
) -> Result<RestoreReport, BackupError> {
    tracing::info!(
        "restoring snapshot v{} ({} records) in {} mode",
        snapshot.version(),
        snapshot.metadata().total_records,
        mode
    );

    let planned = plan(store, snapshot);
    let mut reports: Vec<EntityReport> = planned.iter().map(Planned::report).collect();

    let result = match mode {
        RestoreMode::InPlace => restore_in_place(&planned, &mut reports).await,
        RestoreMode::Staged => restore_staged(store, &planned, &mut reports).await,
    };

    let report = RestoreReport {
        mode,
        entities: reports,
    };

    match result {
        Ok(()) => {
            tracing::info!(
                "restore complete: {} records across {} entities",
                report.total_inserted(),
                report.entities.len()
            );
            Ok(report)
        }
        Err(Stage::Entities) => {
            let summary = summarize(&report);
            tracing::error!("{}", summary);
            Err(BackupError::Restore { summary, report })
        }
        Err(Stage::Promote(source)) => {
            tracing::error!("promotion of staged restore failed: {}", source);
            Err(BackupError::Promote { source, report })
        }
    }
}

/// Why a restore stopped. Entity-level failures live in the reports.
enum Stage {
    Entities,
    Promote(StoreError),
}

/// Delete every live collection, then bulk-insert. No rollback: a failure
/// leaves whatever mix of wiped and reloaded collections happened.
async fn restore_in_place(
    planned: &[Planned<'_>],
    reports: &mut [EntityReport],
) -> Result<(), Stage> {
    wipe(planned, Slot::Live, reports).await?;
    let loaded = load(planned, Slot::Live, reports).await;
    if loaded.is_err() {
        tracing::warn!("in-place restore failed after wipe; live store is in a mixed state");
    }
    loaded
}

/// Load into shadow collections, verify, then promote every entity at once.
/// On failure shadows are discarded and live data is untouched.
async fn restore_staged(
    store: &dyn EntityStore,
    planned: &[Planned<'_>],
    reports: &mut [EntityReport],
) -> Result<(), Stage> {
    let staged = async {
        wipe(planned, Slot::Shadow, reports).await?;
        load(planned, Slot::Shadow, reports).await
    }
    .await;

    if let Err(stage) = staged {
        discard_shadows(planned).await;
        return Err(stage);
    }

    let names: Vec<&str> = planned.iter().map(|p| p.handle.name()).collect();
    if let Err(e) = store.promote(&names).await {
        discard_shadows(planned).await;
        return Err(Stage::Promote(e));
    }
    Ok(())
}

async fn wipe(
    planned: &[Planned<'_>],
    slot: Slot,
    reports: &mut [EntityReport],
) -> Result<(), Stage> {
    let results = join_all(planned.iter().map(|p| p.handle.delete_all(slot))).await;

    let mut failed = false;
    for (report, result) in reports.iter_mut().zip(results) {
        if let Err(e) = result {
            tracing::error!("failed to clear {} ({:?}): {}", report.name, slot, e);
            report.error = Some(format!("delete failed: {}", e));
            failed = true;
        }
    }
    if failed { Err(Stage::Entities) } else { Ok(()) }
}

async fn load(
    planned: &[Planned<'_>],
    slot: Slot,
    reports: &mut [EntityReport],
) -> Result<(), Stage> {
    let inserts = planned.iter().map(|p| async move {
        match p.source {
            Some(source) if !source.records.is_empty() => Some(
                p.handle
                    .insert_many(slot, source.records.to_vec(), InsertOptions::RESTORE)
                    .await,
            ),
            _ => None,
        }
    });
    let results = join_all(inserts).await;

    let mut failed = false;
    for (report, result) in reports.iter_mut().zip(results) {
        match result {
            None => {}
            Some(Ok(summary)) => {
                report.inserted = summary.inserted;
                report.rejected = summary.rejected.len();
                if let Some(first) = summary.rejected.first() {
                    tracing::warn!(
                        "{} of {} {} records rejected (first at #{}: {})",
                        report.rejected,
                        report.expected,
                        report.name,
                        first.index,
                        first.reason
                    );
                    report.error = Some(format!(
                        "{} documents rejected, first at #{}: {}",
                        report.rejected, first.index, first.reason
                    ));
                    failed = true;
                } else {
                    tracing::debug!("loaded {} records into {}", report.inserted, report.name);
                }
            }
            Some(Err(e)) => {
                tracing::error!("failed to insert {}: {}", report.name, e);
                report.error = Some(format!("insert failed: {}", e));
                failed = true;
            }
        }
    }
    if failed { Err(Stage::Entities) } else { Ok(()) }
}

async fn discard_shadows(planned: &[Planned<'_>]) {
    let results = join_all(planned.iter().map(|p| p.handle.delete_all(Slot::Shadow))).await;
    for (p, result) in planned.iter().zip(results) {
        if let Err(e) = result {
            tracing::warn!("failed to discard shadow copy of {}: {}", p.handle.name(), e);
        }
    }
}

fn summarize(report: &RestoreReport) -> String {
    let failures: Vec<String> = report
        .failed()
        .map(|e| match &e.error {
            Some(error) => format!("{} ({})", e.name, error),
            None => e.name.clone(),
        })
        .collect();
    format!("restore failed for {}", failures.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_snapshot;
    use crate::sqlite::SqliteStore;
    use crate::testing::{FaultyStore, Op};
    use chrono::Utc;
    use flock_core::{EntityData, Principal};
    use serde_json::json;

    fn admin() -> Principal {
        Principal::new("admin")
    }

    fn sample_snapshot() -> Snapshot {
        let mut data = EntityData::new();
        data.insert(
            "members",
            vec![
                json!({"_id": "m1", "fullName": "Jane Doe"}),
                json!({"_id": "m2", "fullName": "John Roe"}),
            ],
        );
        data.insert("groups", vec![json!({"_id": "g1", "name": "North"})]);
        data.insert("territoryAssignments", vec![json!({"_id": "ta1", "territory": "T-1"})]);
        data.insert("roles", Vec::new());
        Snapshot::assemble(data, "admin", Utc::now())
    }

    async fn store_with(entity: &str, records: Vec<serde_json::Value>) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_many(entity, Slot::Live, records, InsertOptions::RESTORE)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn staged_restore_replaces_all_state() {
        let store = store_with("duties", vec![json!({"stale": true})]).await;
        let snap = sample_snapshot();

        let report = restore_snapshot(&store, &snap, RestoreMode::Staged).await.unwrap();

        assert_eq!(report.mode, RestoreMode::Staged);
        assert_eq!(report.total_inserted(), 4);
        assert_eq!(store.find_all("members").await.unwrap(), snap.records("members"));
        assert_eq!(store.count("duties").await.unwrap(), 0, "stale data must be wiped");
        assert_eq!(store.count("roles").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn in_place_restore_replaces_all_state() {
        let store = store_with("members", vec![json!({"_id": "old"})]).await;
        let snap = sample_snapshot();

        let report = restore_snapshot(&store, &snap, RestoreMode::InPlace).await.unwrap();

        assert_eq!(report.mode, RestoreMode::InPlace);
        assert_eq!(store.find_all("members").await.unwrap(), snap.records("members"));
        assert_eq!(store.count("groups").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn round_trip_preserves_counts() {
        let source = SqliteStore::open_in_memory().unwrap();
        restore_snapshot(&source, &sample_snapshot(), RestoreMode::Staged)
            .await
            .unwrap();
        let first = build_snapshot(&source, Some(&admin())).await.unwrap();

        let target = store_with("events", vec![json!({"noise": 1})]).await;
        restore_snapshot(&target, &first, RestoreMode::Staged).await.unwrap();
        let second = build_snapshot(&target, Some(&admin())).await.unwrap();

        assert_eq!(second.metadata().total_records, first.metadata().total_records);
        for name in registry::names() {
            assert_eq!(second.records(name), first.records(name), "entity {}", name);
        }
    }

    #[tokio::test]
    async fn legacy_assignments_populate_territory_assignments() {
        let snap = Snapshot::from_value(json!({
            "version": "1.0",
            "data": {
                "assignments": [{"territory": "T-7"}, {"territory": "T-8"}],
                "reports": [{"hours": 5}]
            }
        }))
        .unwrap();
        let store = SqliteStore::open_in_memory().unwrap();

        let report = restore_snapshot(&store, &snap, RestoreMode::Staged).await.unwrap();

        assert_eq!(
            store.find_all("territoryAssignments").await.unwrap(),
            snap.records("assignments")
        );
        assert_eq!(
            store.find_all("fieldServiceReports").await.unwrap(),
            vec![json!({"hours": 5})]
        );
        let ta = report
            .entities
            .iter()
            .find(|e| e.name == "territoryAssignments")
            .unwrap();
        assert_eq!(ta.source_key.as_deref(), Some("assignments"));
        assert_eq!(ta.inserted, 2);
    }

    #[tokio::test]
    async fn empty_and_absent_entities_issue_no_inserts() {
        let inner = SqliteStore::open_in_memory().unwrap();
        let store = FaultyStore::new(inner);
        // Any insert on these would fail the restore
        store.fail(Op::InsertMany, "roles");
        store.fail(Op::InsertMany, "budgets");

        let report = restore_snapshot(&store, &sample_snapshot(), RestoreMode::InPlace)
            .await
            .unwrap();

        let roles = report.entities.iter().find(|e| e.name == "roles").unwrap();
        assert_eq!(roles.expected, 0);
        assert!(roles.is_ok());
    }

    #[tokio::test]
    async fn staged_failure_leaves_live_store_untouched() {
        let store = FaultyStore::new(store_with("members", vec![json!({"_id": "keep"})]).await);
        store.fail_in(Op::InsertMany, Slot::Shadow, "groups");

        let err = restore_snapshot(&store, &sample_snapshot(), RestoreMode::Staged)
            .await
            .unwrap_err();

        let report = err.report().expect("restore errors carry a report");
        let groups = report.entities.iter().find(|e| e.name == "groups").unwrap();
        assert!(groups.error.as_deref().unwrap().contains("insert failed"));
        assert!(err.to_string().contains("groups"));
        assert!(!err.to_string().contains("members"));

        assert_eq!(
            store.inner().find_all("members").await.unwrap(),
            vec![json!({"_id": "keep"})]
        );
        assert_eq!(store.inner().delete_all("members", Slot::Shadow).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn staged_promote_failure_leaves_live_store_untouched() {
        let store = FaultyStore::new(store_with("members", vec![json!({"_id": "keep"})]).await);
        store.fail(Op::Promote, "members");

        let err = restore_snapshot(&store, &sample_snapshot(), RestoreMode::Staged)
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::Promote { .. }));
        assert_eq!(store.inner().count("members").await.unwrap(), 1);
        assert_eq!(store.inner().delete_all("groups", Slot::Shadow).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rejected_documents_fail_staged_restore() {
        let mut data = EntityData::new();
        data.insert(
            "members",
            vec![json!({"_id": "dup"}), json!({"_id": "dup"}), json!({"_id": "ok"})],
        );
        let snap = Snapshot::assemble(data, "admin", Utc::now());
        let store = store_with("members", vec![json!({"_id": "previous"})]).await;

        let err = restore_snapshot(&store, &snap, RestoreMode::Staged)
            .await
            .unwrap_err();

        let members = err
            .report()
            .unwrap()
            .entities
            .iter()
            .find(|e| e.name == "members")
            .unwrap()
            .clone();
        assert_eq!(members.inserted, 2);
        assert_eq!(members.rejected, 1);
        assert_eq!(store.find_all("members").await.unwrap(), vec![json!({"_id": "previous"})]);
    }

    #[tokio::test]
    async fn in_place_failure_reports_failing_entity() {
        let store = FaultyStore::new(store_with("members", vec![json!({"_id": "old"})]).await);
        store.fail_in(Op::InsertMany, Slot::Live, "groups");

        let err = restore_snapshot(&store, &sample_snapshot(), RestoreMode::InPlace)
            .await
            .unwrap_err();

        let report = err.report().unwrap();
        let failed: Vec<_> = report.failed().map(|e| e.name.as_str()).collect();
        assert_eq!(failed, vec!["groups"]);
        // No rollback in this mode: members were wiped and reloaded, groups stayed empty
        assert_eq!(store.inner().count("members").await.unwrap(), 2);
        assert_eq!(store.inner().count("groups").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn in_place_delete_failure_skips_inserts() {
        let store = FaultyStore::new(SqliteStore::open_in_memory().unwrap());
        store.fail_in(Op::DeleteAll, Slot::Live, "expenses");

        let err = restore_snapshot(&store, &sample_snapshot(), RestoreMode::InPlace)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("expenses"));
        assert_eq!(store.inner().count("members").await.unwrap(), 0);
    }
}
