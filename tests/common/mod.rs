//! Common test utilities for sync engine tests
//!
//! Provides:
//! - `FakeRemote`, an in-process backend with scripted failures
//! - Manager construction over an in-memory or temp-file replica
//! - Small record and payload helpers
#![allow(dead_code)]

use async_trait::async_trait;
use billsync::client::{ChangeSet, RemoteApi};
use billsync::sync::{
    EntityKind, ManualProbe, Operation, Record, RecordQuery, Replica, SyncManager, SyncStatus,
};
use billsync::{RemoteError, SyncConfig};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// A remote call as observed by the fake backend
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create(EntityKind, String),
    Update(EntityKind, String),
    Delete(EntityKind, String),
    Fetch(Option<DateTime<Utc>>),
}

#[derive(Default)]
struct FakeState {
    calls: Vec<Call>,
    /// One entry per upcoming push; `true` fails it
    push_script: VecDeque<bool>,
    /// Outcome of pushes once the script is exhausted
    fail_all_pushes: bool,
    fail_fetch: bool,
    changes: ChangeSet,
    /// Server stamps acknowledged records with this time when set
    canonical_updated_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<FakeState>,
    fetch_gate: Mutex<Option<Arc<Notify>>>,
    pub fetch_entered: Notify,
    push_gate: Mutex<Option<Arc<Notify>>>,
    pub push_entered: Notify,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Fetch(_)))
            .count()
    }

    pub fn push_count(&self) -> usize {
        self.calls().len() - self.fetch_count()
    }

    /// Script the outcome of the next pushes, oldest first
    pub fn script_pushes(&self, fail: &[bool]) {
        self.state.lock().unwrap().push_script.extend(fail.iter().copied());
    }

    pub fn fail_next_pushes(&self, n: usize) {
        self.script_pushes(&vec![true; n]);
    }

    pub fn set_fail_all_pushes(&self, fail: bool) {
        self.state.lock().unwrap().fail_all_pushes = fail;
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.state.lock().unwrap().fail_fetch = fail;
    }

    /// Report this record on every subsequent fetch
    pub fn add_change(&self, kind: EntityKind, record: Record) {
        self.state.lock().unwrap().changes.push(kind, record);
    }

    pub fn set_canonical_updated_at(&self, at: DateTime<Utc>) {
        self.state.lock().unwrap().canonical_updated_at = Some(at);
    }

    /// Block every fetch until the returned notify is signalled
    pub fn hold_fetch(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.fetch_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn release_fetch(&self) {
        self.fetch_gate.lock().unwrap().take();
    }

    /// Block every push until the returned notify is signalled
    pub fn hold_pushes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.push_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn release_pushes(&self) {
        self.push_gate.lock().unwrap().take();
    }

    async fn wait_for_push_gate(&self) {
        let gate = self.push_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.push_entered.notify_one();
            gate.notified().await;
        }
    }

    fn push(&self, call: Call, record: Option<&Record>) -> Result<Option<Record>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        let fail_all = state.fail_all_pushes;
        if state.push_script.pop_front().unwrap_or(fail_all) {
            return Err(RemoteError::Rejected {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(record.map(|r| {
            let mut echoed = r.clone().synced();
            if let Some(at) = state.canonical_updated_at {
                echoed.updated_at = at;
            }
            echoed
        }))
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn create(&self, kind: EntityKind, record: &Record) -> Result<Option<Record>, RemoteError> {
        self.wait_for_push_gate().await;
        self.push(Call::Create(kind, record.id.clone()), Some(record))
    }

    async fn update(&self, kind: EntityKind, record: &Record) -> Result<Option<Record>, RemoteError> {
        self.wait_for_push_gate().await;
        self.push(Call::Update(kind, record.id.clone()), Some(record))
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), RemoteError> {
        self.wait_for_push_gate().await;
        self.push(Call::Delete(kind, id.to_string()), None).map(|_| ())
    }

    async fn fetch_changes(&self, since: Option<DateTime<Utc>>) -> Result<ChangeSet, RemoteError> {
        self.state.lock().unwrap().calls.push(Call::Fetch(since));

        let gate = self.fetch_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.fetch_entered.notify_one();
            gate.notified().await;
        }

        let state = self.state.lock().unwrap();
        if state.fail_fetch {
            return Err(RemoteError::Connection("connection refused".to_string()));
        }
        Ok(state.changes.clone())
    }
}

/// Config with every background behaviour off
pub fn quiet_config() -> SyncConfig {
    SyncConfig {
        auto_sync: false,
        push_on_write: false,
        probe_interval_secs: 0,
        ..SyncConfig::default()
    }
}

pub async fn create_test_manager(
    config: SyncConfig,
    online: bool,
) -> (SyncManager, Arc<FakeRemote>, Arc<ManualProbe>) {
    let replica = Replica::in_memory().expect("Failed to open replica");
    create_manager_with_replica(config, replica, online).await
}

pub async fn create_manager_with_replica(
    config: SyncConfig,
    replica: Replica,
    online: bool,
) -> (SyncManager, Arc<FakeRemote>, Arc<ManualProbe>) {
    let remote = FakeRemote::new();
    let probe = Arc::new(ManualProbe::new(online));
    let manager = SyncManager::new(config, replica, remote.clone(), probe.clone())
        .await
        .expect("Failed to create manager");
    manager.set_online(online);
    (manager, remote, probe)
}

pub fn payload(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

pub fn item(code: &str, name: &str) -> Map<String, Value> {
    payload(json!({"code": code, "name": name, "price": 10}))
}

/// A server-side copy of `id` stamped `offset` away from `base`
pub fn server_record(id: &str, base: DateTime<Utc>, offset: chrono::Duration, name: &str) -> Record {
    Record {
        updated_at: base + offset,
        ..Record::with_id(id, payload(json!({"code": "SRV", "name": name}))).synced()
    }
}

/// Poll `check` until it holds or a second of real time has passed
pub async fn wait_for<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Every Pending record has a queued write, and every record with a queued
/// write that is still in the replica is Pending.
pub async fn assert_pending_matches_queue(manager: &SyncManager) {
    let queued = manager.replica().drain_all().await.unwrap();

    for kind in EntityKind::ALL {
        let pending: BTreeSet<String> = manager
            .query(kind, &RecordQuery::Status(SyncStatus::Pending))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();

        let deleted: BTreeSet<&str> = queued
            .iter()
            .filter(|i| i.entity_type == kind && i.operation == Operation::Delete)
            .map(|i| i.record_id())
            .collect();
        let live: BTreeSet<String> = queued
            .iter()
            .filter(|i| i.entity_type == kind && !deleted.contains(i.record_id()))
            .map(|i| i.record_id().to_string())
            .collect();

        assert_eq!(pending, live, "pending records and queued writes disagree for {kind}");
        for id in &deleted {
            assert!(
                manager.get(kind, id).await.unwrap().is_none(),
                "{kind} {id} has a queued delete but is still stored"
            );
        }
    }
}
