//! Outbound write queue
//!
//! Durable FIFO of mutations the server has not acknowledged yet. Items are
//! never popped implicitly: [`LocalStore::drain_all`] returns a snapshot and
//! the orchestrator removes each item once the remote call succeeds.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::record::{now_millis, EntityKind, Record, SyncStatus};
use super::store::{millis_to_datetime, LocalStore};
use crate::error::{Result, SyncError};

/// Kind of mutation carried by a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = SyncError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(SyncError::UnknownOperation(other.to_string())),
        }
    }
}

/// A mutation waiting to be delivered
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// Queue entry id, distinct from the record id
    pub id: Uuid,
    pub entity_type: EntityKind,
    pub operation: Operation,
    /// Snapshot of the record at enqueue time
    pub payload: Record,
    pub enqueued_at: DateTime<Utc>,
    /// Failed delivery attempts so far
    pub retry_count: u32,
}

impl QueueItem {
    pub fn record_id(&self) -> &str {
        &self.payload.id
    }
}

impl LocalStore {
    pub(super) fn init_queue_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sync_queue (
                id TEXT PRIMARY KEY,
                seq INTEGER NOT NULL UNIQUE,
                entity_type TEXT NOT NULL,
                record_id TEXT NOT NULL,
                operation TEXT NOT NULL,
                payload TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_sync_queue_record ON sync_queue(entity_type, record_id);",
        )?;
        Ok(())
    }

    /// Append a mutation to the queue
    pub fn enqueue(
        &mut self,
        kind: EntityKind,
        operation: Operation,
        payload: &Record,
    ) -> Result<QueueItem> {
        let item = QueueItem {
            id: Uuid::new_v4(),
            entity_type: kind,
            operation,
            payload: payload.clone(),
            enqueued_at: now_millis(),
            retry_count: 0,
        };
        let payload_str = serde_json::to_string(&item.payload)?;

        self.conn.execute(
            "INSERT INTO sync_queue (id, seq, entity_type, record_id, operation, payload, enqueued_at)
             VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM sync_queue), ?2, ?3, ?4, ?5, ?6)",
            params![
                item.id.to_string(),
                kind.as_str(),
                item.payload.id,
                operation.as_str(),
                payload_str,
                item.enqueued_at.timestamp_millis(),
            ],
        )?;

        Ok(item)
    }

    /// Snapshot of every queued item, oldest first
    pub fn drain_all(&self) -> Result<Vec<QueueItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entity_type, operation, payload, enqueued_at, retry_count
             FROM sync_queue
             ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (id, entity_type, operation, payload, enqueued_at, retry_count) = row?;
            items.push(QueueItem {
                id: Uuid::parse_str(&id)
                    .map_err(|e| SyncError::Corrupt(format!("bad queue id '{}': {}", id, e)))?,
                entity_type: entity_type.parse()?,
                operation: operation.parse()?,
                payload: serde_json::from_str(&payload)?,
                enqueued_at: millis_to_datetime(enqueued_at),
                retry_count: retry_count as u32,
            });
        }

        Ok(items)
    }

    /// Remove an item after the server acknowledged it
    pub fn remove_queue_item(&mut self, id: Uuid) -> Result<()> {
        self.conn
            .execute("DELETE FROM sync_queue WHERE id = ?1", params![id.to_string()])?;
        Ok(())
    }

    /// Record a failed delivery attempt
    pub fn increment_retry(&mut self, id: Uuid) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_queue SET retry_count = retry_count + 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }

    pub fn queue_len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Whether any item for this record is still waiting
    pub fn has_queued(&self, kind: EntityKind, record_id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE entity_type = ?1 AND record_id = ?2",
            params![kind.as_str(), record_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Drop queued creates/updates for a record the server has superseded.
    /// Returns how many items were removed.
    pub fn discard_superseded(&mut self, kind: EntityKind, record_id: &str) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM sync_queue
             WHERE entity_type = ?1 AND record_id = ?2 AND operation IN (?3, ?4)",
            params![
                kind.as_str(),
                record_id,
                Operation::Create.as_str(),
                Operation::Update.as_str()
            ],
        )?;
        Ok(removed)
    }

    /// Settle an item the server accepted.
    ///
    /// The item leaves the queue. A created or updated record becomes Synced,
    /// adopting the server's `updatedAt` and payload when `canonical` carries
    /// them, unless later writes for it are still queued. The local id is
    /// always kept. Callers must hold the store for the whole call.
    pub fn complete_delivery(&mut self, item: &QueueItem, canonical: Option<Record>) -> Result<()> {
        self.remove_queue_item(item.id)?;
        if item.operation == Operation::Delete {
            return Ok(());
        }

        let kind = item.entity_type;
        let id = item.record_id();
        if self.has_queued(kind, id)? {
            return Ok(());
        }
        let Some(current) = self.get(kind, id)? else {
            return Ok(());
        };

        let synced = match canonical {
            Some(server) => Record {
                id: current.id,
                updated_at: server.updated_at,
                sync_status: SyncStatus::Synced,
                payload: server.payload,
            },
            None => current.synced(),
        };
        self.put(kind, &synced)
    }

    /// Ids of records of this kind with a queued delete
    pub fn queued_deletes(&self, kind: EntityKind) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT record_id FROM sync_queue
             WHERE entity_type = ?1 AND operation = ?2",
        )?;
        let rows = stmt.query_map(params![kind.as_str(), Operation::Delete.as_str()], |row| {
            row.get(0)
        })?;
        let ids = rows.collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }
}
