// ABOUTME: The EntityStore trait: find-all, delete-all, and bulk-insert over named collections.
// ABOUTME: Also binds registry entries to a store as CollectionHandles.

use async_trait::async_trait;
use flock_core::registry::{self, RegistryEntry};
use flock_core::snapshot::Record;
use thiserror::Error;

/// Errors raised by an entity store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("store task failed: {0}")]
    Task(String),

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Which copy of a collection an operation targets.
///
/// `Shadow` collections hold a staged restore until `promote` swaps them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Live,
    Shadow,
}

/// Bulk-insert behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOptions {
    /// Stop at the first rejected document.
    pub ordered: bool,
    /// Skip the document shape check. Store constraints still apply.
    pub bypass_validation: bool,
}

impl InsertOptions {
    /// Options used when reloading exported records: keep going past bad
    /// documents and trust the records' shape.
    pub const RESTORE: InsertOptions = InsertOptions {
        ordered: false,
        bypass_validation: true,
    };
}

impl Default for InsertOptions {
    fn default() -> Self {
        Self {
            ordered: true,
            bypass_validation: false,
        }
    }
}

/// A document the store refused during a bulk insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedDocument {
    /// Position in the input sequence.
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertSummary {
    pub inserted: usize,
    pub rejected: Vec<RejectedDocument>,
}

/// Persistent storage for entity collections.
///
/// Collections are addressed by registry name. Records come back from
/// `find_all` in insertion order.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Every live record in the collection, unpaginated.
    async fn find_all(&self, collection: &str) -> Result<Vec<Record>, StoreError>;

    /// Remove every record from the collection's slot. Returns the number removed.
    async fn delete_all(&self, collection: &str, slot: Slot) -> Result<usize, StoreError>;

    /// Append records to the collection's slot, preserving input order.
    async fn insert_many(
        &self,
        collection: &str,
        slot: Slot,
        records: Vec<Record>,
        options: InsertOptions,
    ) -> Result<InsertSummary, StoreError>;

    /// Atomically replace each named live collection with its shadow and
    /// clear the shadow. Either every collection is promoted or none is.
    async fn promote(&self, collections: &[&str]) -> Result<(), StoreError>;

    /// Number of live records in the collection.
    async fn count(&self, collection: &str) -> Result<usize, StoreError>;
}

/// A registry entry bound to a store: the {find-all, delete-all, bulk-insert}
/// triplet for one entity.
#[derive(Clone, Copy)]
pub struct CollectionHandle<'a> {
    entry: &'static RegistryEntry,
    store: &'a dyn EntityStore,
}

impl<'a> CollectionHandle<'a> {
    pub fn new(entry: &'static RegistryEntry, store: &'a dyn EntityStore) -> Self {
        Self { entry, store }
    }

    pub fn name(&self) -> &'static str {
        self.entry.name
    }

    pub async fn find_all(&self) -> Result<Vec<Record>, StoreError> {
        self.store.find_all(self.entry.name).await
    }

    pub async fn delete_all(&self, slot: Slot) -> Result<usize, StoreError> {
        self.store.delete_all(self.entry.name, slot).await
    }

    pub async fn insert_many(
        &self,
        slot: Slot,
        records: Vec<Record>,
        options: InsertOptions,
    ) -> Result<InsertSummary, StoreError> {
        self.store
            .insert_many(self.entry.name, slot, records, options)
            .await
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        self.store.count(self.entry.name).await
    }
}

/// Bind every registry entry, in registry order, to `store`.
pub fn handles(store: &dyn EntityStore) -> impl Iterator<Item = CollectionHandle<'_>> {
    registry::list()
        .iter()
        .map(move |entry| CollectionHandle::new(entry, store))
}

/// Reject collection names the registry does not know.
pub(crate) fn ensure_registered(collection: &str) -> Result<&'static str, StoreError> {
    registry::lookup(collection)
        .map(|entry| entry.name)
        .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))
}
