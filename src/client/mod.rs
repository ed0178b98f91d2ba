//! Remote backend access
//!
//! The sync engine only needs a narrow contract from the backend: per-kind
//! create/update/delete, and a delta feed of changes since a point in time.

mod builder;
mod http_client;

pub use builder::HttpClientBuilder;
pub use http_client::HttpClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::sync::{EntityKind, Record};

/// Server-reported changes, grouped per entity kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default)]
    pub items: Vec<Record>,
    #[serde(default)]
    pub billings: Vec<Record>,
}

impl ChangeSet {
    /// Take the changes for one kind, leaving an empty list behind
    pub fn take(&mut self, kind: EntityKind) -> Vec<Record> {
        match kind {
            EntityKind::Items => std::mem::take(&mut self.items),
            EntityKind::Billings => std::mem::take(&mut self.billings),
        }
    }

    pub fn push(&mut self, kind: EntityKind, record: Record) {
        match kind {
            EntityKind::Items => self.items.push(record),
            EntityKind::Billings => self.billings.push(record),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len() + self.billings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Body of `GET /sync/changes`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangesResponse {
    #[serde(default)]
    pub changes: ChangeSet,
}

/// Backend operations consumed by the orchestrator.
///
/// Create and update must be idempotent on the client-assigned id: delivery
/// is at-least-once.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// `POST /<kind>`; returns the server-canonical record when one is sent back
    async fn create(&self, kind: EntityKind, record: &Record)
        -> Result<Option<Record>, RemoteError>;

    /// `PUT /<kind>/<id>`
    async fn update(&self, kind: EntityKind, record: &Record)
        -> Result<Option<Record>, RemoteError>;

    /// `DELETE /<kind>/<id>`
    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), RemoteError>;

    /// `GET /sync/changes?since=<RFC 3339>`; `None` means since epoch
    async fn fetch_changes(&self, since: Option<DateTime<Utc>>)
        -> Result<ChangeSet, RemoteError>;
}
