//! Replicated record types
//!
//! A [`Record`] is one billing or inventory entity held in the local replica.
//! Its domain fields travel as an opaque JSON object; the sync engine only
//! reads `id`, `updatedAt` and the per-record [`SyncStatus`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

/// Supported entity kinds.
///
/// Every kind owns one local table and one remote endpoint; adding a kind
/// means adding a variant here and the compiler points at every mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Items,
    Billings,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Items, EntityKind::Billings];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Items => "items",
            EntityKind::Billings => "billings",
        }
    }

    /// Local SQLite table holding this kind
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Items => "items",
            EntityKind::Billings => "billings",
        }
    }

    /// Remote collection path, e.g. `/items`
    pub fn endpoint(&self) -> &'static str {
        match self {
            EntityKind::Items => "/items",
            EntityKind::Billings => "/billings",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "items" | "item" => Ok(EntityKind::Items),
            "billings" | "billing" => Ok(EntityKind::Billings),
            other => Err(SyncError::UnknownEntity(other.to_string())),
        }
    }
}

/// Whether a record still owes a push to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Local changes not yet acknowledged by the server
    Pending,
    /// Matches the last known server state
    #[default]
    Synced,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            other => Err(SyncError::Corrupt(format!("invalid sync status '{}'", other))),
        }
    }
}

/// One billing or inventory entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Assigned at local creation, never changed by the server
    pub id: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub sync_status: SyncStatus,
    /// Domain fields, flattened next to the sync fields on the wire
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Record {
    /// A freshly created local record with a client-assigned id
    pub fn new_local(payload: Map<String, Value>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), payload)
    }

    /// A pending record with the given id, stamped now
    pub fn with_id(id: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            updated_at: now_millis(),
            sync_status: SyncStatus::Pending,
            payload,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.sync_status == SyncStatus::Pending
    }

    /// Business code, used for prefix lookups
    pub fn code(&self) -> Option<&str> {
        self.payload.get("code").and_then(Value::as_str)
    }

    /// Display name, used for prefix lookups
    pub fn name(&self) -> Option<&str> {
        self.payload.get("name").and_then(Value::as_str)
    }

    pub fn synced(mut self) -> Self {
        self.sync_status = SyncStatus::Synced;
        self
    }

    pub fn pending(mut self) -> Self {
        self.sync_status = SyncStatus::Pending;
        self
    }
}

/// Current time at the millisecond precision the replica stores
pub(crate) fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
