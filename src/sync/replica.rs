//! Async handle over the local store
//!
//! Each call takes the store lock once and releases it before returning, so
//! a caller waiting on the network never holds the replica. Steps that read
//! and then write (local writes, merging a pull, settling a delivery) run
//! inside one acquisition so application writes cannot land in between.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::queue::{Operation, QueueItem};
use super::record::{EntityKind, Record, SyncStatus};
use super::resolver::{Resolution, Strategy};
use super::store::{LocalStore, RecordQuery};
use crate::error::Result;

#[derive(Clone)]
pub struct Replica {
    inner: Arc<Mutex<LocalStore>>,
}

impl Replica {
    pub fn new(store: LocalStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(LocalStore::open_in_memory()?))
    }

    pub async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Record>> {
        self.inner.lock().await.get(kind, id)
    }

    pub async fn query(&self, kind: EntityKind, query: &RecordQuery) -> Result<Vec<Record>> {
        self.inner.lock().await.query(kind, query)
    }

    pub async fn count(&self, kind: EntityKind, status: Option<SyncStatus>) -> Result<usize> {
        self.inner.lock().await.count(kind, status)
    }

    pub async fn drain_all(&self) -> Result<Vec<QueueItem>> {
        self.inner.lock().await.drain_all()
    }

    pub async fn increment_retry(&self, id: Uuid) -> Result<()> {
        self.inner.lock().await.increment_retry(id)
    }

    pub async fn queue_len(&self) -> Result<usize> {
        self.inner.lock().await.queue_len()
    }

    /// Merge one kind's server changes under a single lock acquisition
    pub async fn merge_remote(
        &self,
        kind: EntityKind,
        server_changes: Vec<Record>,
        strategy: Strategy,
    ) -> Result<Resolution> {
        self.inner
            .lock()
            .await
            .merge_remote(kind, server_changes, strategy)
    }

    /// Settle a delivered queue item under a single lock acquisition
    pub async fn complete_delivery(&self, item: &QueueItem, canonical: Option<Record>) -> Result<()> {
        self.inner.lock().await.complete_delivery(item, canonical)
    }

    pub async fn last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
        self.inner.lock().await.last_sync_time()
    }

    pub async fn set_last_sync_time(&self, at: DateTime<Utc>) -> Result<()> {
        self.inner.lock().await.set_last_sync_time(at)
    }

    /// Write a local record and its queue item under one lock acquisition
    pub(crate) async fn write_local(
        &self,
        kind: EntityKind,
        operation: Operation,
        record: &Record,
    ) -> Result<QueueItem> {
        let mut store = self.inner.lock().await;
        match operation {
            Operation::Delete => {
                store.delete(kind, &record.id)?;
            }
            Operation::Create | Operation::Update => store.put(kind, record)?,
        }
        store.enqueue(kind, operation, record)
    }
}
