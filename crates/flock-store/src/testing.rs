// ABOUTME: Test utilities for flock-store, including a fault-injecting EntityStore wrapper.
// ABOUTME: Used to drive failure paths (read, delete, insert, promote) and count store calls.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use flock_core::snapshot::Record;

use crate::store::{EntityStore, InsertOptions, InsertSummary, Slot, StoreError};

/// A store operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    FindAll,
    DeleteAll,
    InsertMany,
    Promote,
}

/// Wraps a real store and fails selected operations on selected collections.
///
/// `promote` faults match on any collection name in the promoted set.
pub struct FaultyStore<S> {
    inner: S,
    faults: Mutex<Vec<(Op, Option<Slot>, String)>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl<S: EntityStore> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            faults: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Sleep before every operation, widening race windows in concurrency tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail `op` on `collection` in any slot.
    pub fn fail(&self, op: Op, collection: &str) {
        self.push_fault(op, None, collection);
    }

    /// Fail `op` on `collection` only in the given slot.
    pub fn fail_in(&self, op: Op, slot: Slot, collection: &str) {
        self.push_fault(op, Some(slot), collection);
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.clear();
        }
    }

    /// Total operations issued against this store.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn push_fault(&self, op: Op, slot: Option<Slot>, collection: &str) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push((op, slot, collection.to_string()));
        }
    }

    async fn enter(&self, op: Op, slot: Option<Slot>, collection: &str) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let hit = self.faults.lock().map_err(|_| StoreError::LockPoisoned)?.iter().any(
            |(fault_op, fault_slot, fault_collection)| {
                *fault_op == op
                    && fault_collection == collection
                    && (fault_slot.is_none() || *fault_slot == slot)
            },
        );
        if hit {
            return Err(StoreError::Unavailable(format!(
                "injected {:?} failure on {}",
                op, collection
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: EntityStore> EntityStore for FaultyStore<S> {
    async fn find_all(&self, collection: &str) -> Result<Vec<Record>, StoreError> {
        self.enter(Op::FindAll, Some(Slot::Live), collection).await?;
        self.inner.find_all(collection).await
    }

    async fn delete_all(&self, collection: &str, slot: Slot) -> Result<usize, StoreError> {
        self.enter(Op::DeleteAll, Some(slot), collection).await?;
        self.inner.delete_all(collection, slot).await
    }

    async fn insert_many(
        &self,
        collection: &str,
        slot: Slot,
        records: Vec<Record>,
        options: InsertOptions,
    ) -> Result<InsertSummary, StoreError> {
        self.enter(Op::InsertMany, Some(slot), collection).await?;
        self.inner
            .insert_many(collection, slot, records, options)
            .await
    }

    async fn promote(&self, collections: &[&str]) -> Result<(), StoreError> {
        for collection in collections {
            // Count once per promote call, not per collection
            let hit = self.faults.lock().map_err(|_| StoreError::LockPoisoned)?.iter().any(
                |(op, _, name)| *op == Op::Promote && name == collection,
            );
            if hit {
                self.calls.fetch_add(1, Ordering::SeqCst);
                return Err(StoreError::Unavailable(format!(
                    "injected Promote failure on {}",
                    collection
                )));
            }
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.promote(collections).await
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        self.enter(Op::FindAll, Some(Slot::Live), collection).await?;
        self.inner.count(collection).await
    }
}
