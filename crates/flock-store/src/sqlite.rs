// ABOUTME: SQLite-backed EntityStore keeping every collection as ordered JSON documents.
// ABOUTME: Live and shadow tables share one schema; promotion swaps them in a single transaction.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flock_core::snapshot::Record;
use rusqlite::{Connection, ErrorCode, params};

use crate::store::{
    EntityStore, InsertOptions, InsertSummary, RejectedDocument, Slot, StoreError,
    ensure_registered,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS records (
        collection TEXT NOT NULL,
        seq INTEGER NOT NULL,
        doc_id TEXT,
        doc TEXT NOT NULL,
        PRIMARY KEY (collection, seq)
    );
    CREATE UNIQUE INDEX IF NOT EXISTS records_doc_id ON records (collection, doc_id);

    CREATE TABLE IF NOT EXISTS shadow_records (
        collection TEXT NOT NULL,
        seq INTEGER NOT NULL,
        doc_id TEXT,
        doc TEXT NOT NULL,
        PRIMARY KEY (collection, seq)
    );
    CREATE UNIQUE INDEX IF NOT EXISTS shadow_records_doc_id ON shadow_records (collection, doc_id);
";

fn table(slot: Slot) -> &'static str {
    match slot {
        Slot::Live => "records",
        Slot::Shadow => "shadow_records",
    }
}

/// Identity used for the per-collection uniqueness constraint.
///
/// The key is the JSON text of `_id`, so `1`, `"1"` and `{"$oid": "1"}` stay
/// distinct. Documents without `_id` are never considered duplicates.
fn document_id(record: &Record) -> Option<String> {
    match record.get("_id")? {
        serde_json::Value::Null => None,
        id => Some(id.to_string()),
    }
}

/// A SQLite database holding all entity collections.
///
/// The connection sits behind a mutex and every call runs on the blocking
/// pool, so concurrently issued operations serialize at the connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open or create a store database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("create {}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// A private in-memory store, mainly for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn insert_records(
    conn: &mut Connection,
    collection: &str,
    slot: Slot,
    records: &[Record],
    options: InsertOptions,
) -> Result<InsertSummary, StoreError> {
    let table = table(slot);
    let tx = conn.transaction()?;
    let mut summary = InsertSummary::default();

    {
        let mut next_seq: i64 = tx.query_row(
            &format!("SELECT COALESCE(MAX(seq) + 1, 0) FROM {table} WHERE collection = ?1"),
            params![collection],
            |row| row.get(0),
        )?;
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {table} (collection, seq, doc_id, doc) VALUES (?1, ?2, ?3, ?4)"
        ))?;

        for (index, record) in records.iter().enumerate() {
            if !options.bypass_validation && !record.is_object() {
                summary.rejected.push(RejectedDocument {
                    index,
                    reason: "document is not a JSON object".to_string(),
                });
                if options.ordered {
                    break;
                }
                continue;
            }

            let doc = serde_json::to_string(record)?;
            match stmt.execute(params![collection, next_seq, document_id(record), doc]) {
                Ok(_) => {
                    summary.inserted += 1;
                    next_seq += 1;
                }
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    summary.rejected.push(RejectedDocument {
                        index,
                        reason: format!(
                            "duplicate _id {}",
                            document_id(record).unwrap_or_default()
                        ),
                    });
                    if options.ordered {
                        break;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    tx.commit()?;
    Ok(summary)
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn find_all(&self, collection: &str) -> Result<Vec<Record>, StoreError> {
        let collection = ensure_registered(collection)?;
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT doc FROM records WHERE collection = ?1 ORDER BY seq ASC")?;
            let rows = stmt.query_map(params![collection], |row| row.get::<_, String>(0))?;

            let mut records = Vec::new();
            for row in rows {
                records.push(serde_json::from_str(&row?)?);
            }
            Ok(records)
        })
        .await
    }

    async fn delete_all(&self, collection: &str, slot: Slot) -> Result<usize, StoreError> {
        let collection = ensure_registered(collection)?;
        self.with_conn(move |conn| {
            let removed = conn.execute(
                &format!("DELETE FROM {} WHERE collection = ?1", table(slot)),
                params![collection],
            )?;
            Ok(removed)
        })
        .await
    }

    async fn insert_many(
        &self,
        collection: &str,
        slot: Slot,
        records: Vec<Record>,
        options: InsertOptions,
    ) -> Result<InsertSummary, StoreError> {
        let collection = ensure_registered(collection)?;
        self.with_conn(move |conn| insert_records(conn, collection, slot, &records, options))
            .await
    }

    async fn promote(&self, collections: &[&str]) -> Result<(), StoreError> {
        let collections = collections
            .iter()
            .map(|name| ensure_registered(name))
            .collect::<Result<Vec<_>, _>>()?;

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for collection in &collections {
                tx.execute("DELETE FROM records WHERE collection = ?1", params![collection])?;
                tx.execute(
                    "INSERT INTO records (collection, seq, doc_id, doc)
                     SELECT collection, seq, doc_id, doc FROM shadow_records
                     WHERE collection = ?1 ORDER BY seq ASC",
                    params![collection],
                )?;
                tx.execute(
                    "DELETE FROM shadow_records WHERE collection = ?1",
                    params![collection],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        let collection = ensure_registered(collection)?;
        self.with_conn(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM records WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(n).unwrap_or(0))
        })
        .await
    }
}
