// ABOUTME: Builds a full Snapshot by reading every registered collection concurrently.
// ABOUTME: Reads are independent, so the result is not a point-in-time view across entities.

use chrono::Utc;
use flock_core::{EntityData, Principal, Snapshot};
use futures::future::try_join_all;

use crate::error::BackupError;
use crate::store::{EntityStore, handles};

/// Read every registered collection and assemble a current-version snapshot.
///
/// Fails with `Unauthorized` before touching the store when there is no
/// requester. Any single read failure aborts the whole build.
///
/// Each collection is consistent as of its own read. Writers running during
/// the build can leave cross-entity references that do not resolve.
pub async fn build_snapshot(
    store: &dyn EntityStore,
    requester: Option<&Principal>,
) -> Result<Snapshot, BackupError> {
    let principal = requester.ok_or(BackupError::Unauthorized)?;

    let reads = handles(store).map(|handle| async move {
        let records = handle
            .find_all()
            .await
            .map_err(|source| BackupError::Read {
                entity: handle.name(),
                source,
            })?;
        tracing::debug!("read {} records from {}", records.len(), handle.name());
        Ok::<_, BackupError>((handle.name().to_string(), records))
    });

    let collections = try_join_all(reads).await?;
    let data: EntityData = collections.into_iter().collect();
    let snapshot = Snapshot::assemble(data, &principal.name, Utc::now());

    tracing::info!(
        "built snapshot for {}: {} records across {} entities",
        principal.name,
        snapshot.metadata().total_records,
        snapshot.data().len()
    );

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteStore;
    use crate::store::{InsertOptions, Slot};
    use crate::testing::{FaultyStore, Op};
    use flock_core::registry;
    use serde_json::json;

    async fn seeded_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_many(
                "members",
                Slot::Live,
                vec![json!({"fullName": "Jane Doe"}), json!({"fullName": "John Roe"})],
                InsertOptions::RESTORE,
            )
            .await
            .unwrap();
        store
            .insert_many("territories", Slot::Live, vec![json!({"number": 1})], InsertOptions::RESTORE)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn build_covers_every_registered_entity() {
        let store = seeded_store().await;
        let principal = Principal::new("admin");

        let snap = build_snapshot(&store, Some(&principal)).await.unwrap();

        assert_eq!(snap.data().len(), registry::list().len());
        for name in registry::names() {
            assert!(snap.data().contains(name), "missing {}", name);
        }
        assert_eq!(snap.records("members").len(), 2);
        assert!(snap.records("groups").is_empty());
        assert_eq!(snap.metadata().total_records, 3);
        assert_eq!(snap.metadata().total_members, 2);
        assert_eq!(snap.metadata().total_territories, 1);
        assert_eq!(snap.metadata().created_by, "admin");
        assert_eq!(snap.version(), "2.0");
    }

    #[tokio::test]
    async fn build_without_requester_is_unauthorized_and_reads_nothing() {
        let store = FaultyStore::new(seeded_store().await);

        let err = build_snapshot(&store, None).await.unwrap_err();

        assert!(matches!(err, BackupError::Unauthorized));
        assert_eq!(err.to_string(), "Unauthorized");
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn single_read_failure_aborts_build() {
        let store = FaultyStore::new(seeded_store().await);
        store.fail(Op::FindAll, "coVisits");

        let err = build_snapshot(&store, Some(&Principal::new("admin")))
            .await
            .unwrap_err();

        match err {
            BackupError::Read { entity, .. } => assert_eq!(entity, "coVisits"),
            other => panic!("expected read error, got {other:?}"),
        }
    }
}
