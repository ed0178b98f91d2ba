//! Sync Orchestrator
//!
//! Runs one sync cycle at a time: drain the outbound queue against the
//! remote API, pull remote changes since the last successful cycle, merge
//! them with still-pending local records, and publish the resulting state.
//!
//! Nothing escapes [`SyncOrchestrator::sync_data`] as an error. Every failure
//! ends up in the returned [`SyncOutcome`] and the published [`SyncState`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::connectivity::ConnectivityMonitor;
use super::listeners::{ListenerId, Listeners};
use super::queue::{Operation, QueueItem};
use super::record::{EntityKind, Record};
use super::replica::Replica;
use super::resolver::{Conflict, Strategy};
use crate::client::RemoteApi;
use crate::error::{RemoteError, Result, SyncError};

/// Phase of the orchestrator state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
    Completed,
    Failed,
}

/// Read model published to listeners
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub status: SyncPhase,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub message: String,
    pub processed_count: usize,
    pub conflicts: Vec<Conflict>,
}

/// Why a cycle refused to start or did not finish
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncFailure {
    AlreadyInProgress,
    Offline,
    /// The local store could not be read or written
    LocalStore,
    PullFailure,
}

/// Result of [`SyncOrchestrator::sync_data`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub success: bool,
    pub message: String,
    pub processed_count: usize,
    pub conflicts: Vec<Conflict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<SyncFailure>,
}

impl SyncOutcome {
    fn refused(failure: SyncFailure, message: &str) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            processed_count: 0,
            conflicts: vec![],
            failure: Some(failure),
        }
    }
}

/// Clears the in-flight flag however the cycle ends
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncOrchestrator {
    replica: Replica,
    remote: Arc<dyn RemoteApi>,
    monitor: Arc<ConnectivityMonitor>,
    default_strategy: Strategy,
    state: RwLock<SyncState>,
    is_syncing: AtomicBool,
    listeners: Listeners<SyncState>,
}

impl SyncOrchestrator {
    /// Create an orchestrator, restoring the persisted last sync time
    pub async fn new(
        replica: Replica,
        remote: Arc<dyn RemoteApi>,
        monitor: Arc<ConnectivityMonitor>,
    ) -> Result<Self> {
        let last_sync_time = replica.last_sync_time().await?;

        Ok(Self {
            replica,
            remote,
            monitor,
            default_strategy: Strategy::default(),
            state: RwLock::new(SyncState {
                last_sync_time,
                ..SyncState::default()
            }),
            is_syncing: AtomicBool::new(false),
            listeners: Listeners::new("sync status"),
        })
    }

    /// Strategy used by scheduled and connectivity-triggered cycles
    pub fn with_default_strategy(mut self, strategy: Strategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    pub fn default_strategy(&self) -> Strategy {
        self.default_strategy
    }

    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::Acquire)
    }

    pub fn is_online(&self) -> bool {
        self.monitor.get_status()
    }

    /// Snapshot of the current read model
    pub async fn state(&self) -> SyncState {
        self.state.read().await.clone()
    }

    pub fn add_listener<F>(&self, cb: F) -> ListenerId
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        self.listeners.add(cb)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Connectivity transition hook: going online starts a cycle
    pub async fn handle_network_change(&self, online: bool) -> Option<SyncOutcome> {
        if !online {
            return None;
        }
        info!("Going online - will sync");
        Some(self.sync_data(self.default_strategy).await)
    }

    /// Run one full sync cycle.
    ///
    /// Refuses immediately, without touching state, when a cycle is already
    /// running or the device is offline.
    pub async fn sync_data(&self, strategy: Strategy) -> SyncOutcome {
        if self
            .is_syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sync requested while a cycle is running");
            return SyncOutcome::refused(SyncFailure::AlreadyInProgress, "Sync already in progress");
        }
        let _guard = SyncingGuard(&self.is_syncing);

        if !self.monitor.get_status() {
            debug!("Sync requested while offline");
            return SyncOutcome::refused(SyncFailure::Offline, "Offline - changes are queued locally");
        }

        info!("Starting sync cycle (strategy: {})", strategy);
        let previous = self.state.read().await.status;
        if previous != SyncPhase::Idle {
            self.publish(|s| {
                s.status = SyncPhase::Idle;
                s.message.clear();
            })
            .await;
        }
        self.publish(|s| {
            s.status = SyncPhase::Syncing;
            s.message = "Pushing local changes".to_string();
            s.processed_count = 0;
            s.conflicts.clear();
        })
        .await;

        let processed = match self.drain_queue().await {
            Ok(processed) => processed,
            Err(e) => {
                error!("Drain phase aborted by local store error: {}", e);
                return self
                    .finish_failed(SyncFailure::LocalStore, format!("Local store error: {}", e), 0)
                    .await;
            }
        };

        self.publish(|s| {
            s.message = "Pulling remote changes".to_string();
            s.processed_count = processed;
        })
        .await;

        let (conflicts, pulled_at) = match self.pull_changes(strategy).await {
            Ok(result) => result,
            Err(e) => {
                error!("Pull phase failed: {}", e);
                let failure = match e {
                    SyncError::Remote(_) => SyncFailure::PullFailure,
                    _ => SyncFailure::LocalStore,
                };
                return self
                    .finish_failed(failure, format!("Pull failed: {}", e), processed)
                    .await;
            }
        };

        if let Err(e) = self.replica.set_last_sync_time(pulled_at).await {
            warn!("Failed to persist last sync time: {}", e);
        }

        let message = format!(
            "Sync completed: {} pushed, {} conflicts",
            processed,
            conflicts.len()
        );
        info!("{}", message);

        let conflicts_out = conflicts.clone();
        self.publish(|s| {
            s.status = SyncPhase::Completed;
            s.last_sync_time = Some(pulled_at);
            s.message = message.clone();
            s.processed_count = processed;
            s.conflicts = conflicts;
        })
        .await;

        SyncOutcome {
            success: true,
            message,
            processed_count: processed,
            conflicts: conflicts_out,
            failure: None,
        }
    }

    /// Deliver every queued item, oldest first.
    ///
    /// A rejected item stays queued for the next cycle; only local store
    /// errors abort the phase.
    async fn drain_queue(&self) -> Result<usize> {
        let items = self.replica.drain_all().await?;
        if items.is_empty() {
            debug!("Outbound queue empty");
            return Ok(0);
        }
        debug!("Pushing {} queued changes", items.len());

        let mut processed = 0;
        for item in items {
            match self.deliver(&item).await {
                Ok(canonical) => {
                    self.replica.complete_delivery(&item, canonical).await?;
                    processed += 1;
                    debug!(
                        "Delivered {} {} {}",
                        item.operation,
                        item.entity_type,
                        item.record_id()
                    );
                }
                Err(e) => {
                    warn!(
                        "Failed to push {} {} {} (attempt {}): {}",
                        item.operation,
                        item.entity_type,
                        item.record_id(),
                        item.retry_count + 1,
                        e
                    );
                    self.replica.increment_retry(item.id).await?;
                }
            }
        }

        Ok(processed)
    }

    async fn deliver(&self, item: &QueueItem) -> std::result::Result<Option<Record>, RemoteError> {
        let kind = item.entity_type;
        match item.operation {
            Operation::Create => self.remote.create(kind, &item.payload).await,
            Operation::Update => self.remote.update(kind, &item.payload).await,
            Operation::Delete => self
                .remote
                .delete(kind, item.record_id())
                .await
                .map(|_| None),
        }
    }

    /// Fetch remote deltas and merge them into the replica.
    ///
    /// Returns the conflicts seen and the instant the fetch was issued.
    async fn pull_changes(&self, strategy: Strategy) -> Result<(Vec<Conflict>, DateTime<Utc>)> {
        let since = self.state.read().await.last_sync_time;
        let pulled_at = Utc::now();

        let mut changes = self.remote.fetch_changes(since).await?;
        debug!("Pulled {} remote changes since {:?}", changes.len(), since);

        let mut conflicts = Vec::new();
        for kind in EntityKind::ALL {
            let server = changes.take(kind);
            if server.is_empty() {
                continue;
            }

            let resolution = self.replica.merge_remote(kind, server, strategy).await?;
            debug!(
                "Applied {} server records to {}",
                resolution.synced_count(),
                kind
            );
            if !resolution.conflicts.is_empty() {
                info!(
                    "{} conflicts on {} resolved with strategy {}",
                    resolution.conflicts.len(),
                    kind,
                    strategy
                );
            }
            conflicts.extend(resolution.conflicts);
        }

        Ok((conflicts, pulled_at))
    }

    async fn finish_failed(
        &self,
        failure: SyncFailure,
        message: String,
        processed: usize,
    ) -> SyncOutcome {
        self.publish(|s| {
            s.status = SyncPhase::Failed;
            s.message = message.clone();
            s.processed_count = processed;
        })
        .await;

        SyncOutcome {
            success: false,
            message,
            processed_count: processed,
            conflicts: vec![],
            failure: Some(failure),
        }
    }

    /// Apply an update to the state and notify listeners outside the lock
    async fn publish<F>(&self, update: F)
    where
        F: FnOnce(&mut SyncState),
    {
        let snapshot = {
            let mut state = self.state.write().await;
            update(&mut state);
            state.clone()
        };
        self.listeners.notify(&snapshot);
    }
}
