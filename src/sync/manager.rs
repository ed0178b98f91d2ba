//! Sync Manager
//!
//! Explicitly constructed context object tying the replica, the connectivity
//! monitor and the orchestrator together. Owns the background worker that
//! serialises connectivity-triggered, periodic and nudged sync cycles.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::connectivity::{ConnectivityMonitor, HttpProbe, NetworkProbe};
use super::listeners::ListenerId;
use super::orchestrator::{SyncOrchestrator, SyncOutcome, SyncState};
use super::queue::Operation;
use super::record::{EntityKind, Record};
use super::replica::Replica;
use super::resolver::Strategy;
use super::store::{LocalStore, RecordQuery};
use crate::client::{HttpClientBuilder, RemoteApi};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};

/// Commands handled by the background worker
#[derive(Debug)]
pub enum SyncCommand {
    /// Run a cycle with the given strategy
    SyncNow(Strategy),
    /// Connectivity transition reported by the monitor
    NetworkChanged(bool),
    /// Install or replace the periodic schedule
    SchedulePeriodic(Duration),
    /// Cancel the periodic schedule
    StopPeriodic,
    /// Stop the worker once the current cycle is done
    Stop,
}

pub struct SyncManager {
    config: SyncConfig,
    replica: Replica,
    monitor: Arc<ConnectivityMonitor>,
    orchestrator: Arc<SyncOrchestrator>,
    command_tx: Option<mpsc::Sender<SyncCommand>>,
    worker: Option<JoinHandle<()>>,
    poller: Option<JoinHandle<()>>,
    network_listener: Option<ListenerId>,
}

impl SyncManager {
    /// Wire a manager from explicit collaborators
    pub async fn new(
        config: SyncConfig,
        replica: Replica,
        remote: Arc<dyn RemoteApi>,
        probe: Arc<dyn NetworkProbe>,
    ) -> Result<Self> {
        let monitor = Arc::new(ConnectivityMonitor::new(probe));
        let orchestrator = SyncOrchestrator::new(replica.clone(), remote, monitor.clone())
            .await?
            .with_default_strategy(config.default_strategy);

        Ok(Self {
            config,
            replica,
            monitor,
            orchestrator: Arc::new(orchestrator),
            command_tx: None,
            worker: None,
            poller: None,
            network_listener: None,
        })
    }

    /// Build the HTTP remote, health probe and on-disk replica from config
    pub async fn from_config(config: SyncConfig) -> Result<Self> {
        config.validate()?;

        let mut builder =
            HttpClientBuilder::new(&config.server_url).timeout_secs(config.request_timeout_secs);
        if let Some(token) = &config.auth_token {
            builder = builder.token(token);
        }
        let client = Arc::new(builder.build()?);

        let store = match &config.database_path {
            Some(path) => LocalStore::open(path)?,
            None => LocalStore::open_default(&config.app_name)?,
        };

        let probe = Arc::new(HttpProbe::new(client.clone()));
        Self::new(config, Replica::new(store), client, probe).await
    }

    /// Start the worker, subscribe to connectivity and take a first reading
    pub async fn init(&mut self) {
        if self.command_tx.is_some() {
            debug!("Sync manager already running");
            return;
        }

        let (tx, rx) = mpsc::channel(100);
        self.command_tx = Some(tx.clone());

        let periodic = self.config.auto_sync.then(|| self.config.sync_interval());
        self.worker = Some(tokio::spawn(run_worker(
            self.orchestrator.clone(),
            rx,
            periodic,
        )));

        let listener_tx = tx;
        self.network_listener = Some(self.monitor.add_listener(move |online| {
            if let Err(e) = listener_tx.try_send(SyncCommand::NetworkChanged(online)) {
                warn!("Dropped connectivity change: {}", e);
            }
        }));

        self.monitor.poll().await;

        self.poller = self
            .config
            .probe_interval()
            .map(|every| self.monitor.spawn_polling(every));

        info!(
            "Sync manager started (online: {}, auto sync: {})",
            self.monitor.get_status(),
            self.config.auto_sync
        );
    }

    /// Stop polling and the worker. A cycle already running finishes first.
    pub async fn shutdown(&mut self) {
        if let Some(id) = self.network_listener.take() {
            self.monitor.remove_listener(id);
        }
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
        if let Some(tx) = self.command_tx.take() {
            let _ = tx.send(SyncCommand::Stop).await;
        }
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                error!("Sync worker ended abnormally: {}", e);
            }
        }
        info!("Sync manager stopped");
    }

    pub fn is_running(&self) -> bool {
        self.command_tx.is_some()
    }

    async fn send(&self, command: SyncCommand) -> Result<()> {
        let tx = self.command_tx.as_ref().ok_or(SyncError::ManagerStopped)?;
        tx.send(command)
            .await
            .map_err(|_| SyncError::ManagerStopped)
    }

    /// Sync every `every` while online and idle
    pub async fn schedule_periodic_sync(&self, every: Duration) -> Result<()> {
        self.send(SyncCommand::SchedulePeriodic(every)).await
    }

    /// Cancel future scheduled cycles; a running one is not interrupted
    pub async fn stop_periodic_sync(&self) -> Result<()> {
        self.send(SyncCommand::StopPeriodic).await
    }

    /// Run a cycle now and wait for its outcome
    pub async fn sync_now(&self, strategy: Strategy) -> SyncOutcome {
        self.orchestrator.sync_data(strategy).await
    }

    /// Report an externally observed connectivity state
    pub fn set_online(&self, online: bool) -> bool {
        self.monitor.report(online)
    }

    pub fn is_online(&self) -> bool {
        self.monitor.get_status()
    }

    pub async fn state(&self) -> SyncState {
        self.orchestrator.state().await
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    // === Application writes ===

    /// Create a record locally; it is pushed on the next cycle
    pub async fn create(&self, kind: EntityKind, payload: Map<String, Value>) -> Result<Record> {
        let record = Record::new_local(payload);
        self.replica
            .write_local(kind, Operation::Create, &record)
            .await?;
        debug!("Created {} {} locally", kind, record.id);
        self.nudge();
        Ok(record)
    }

    /// Replace a record's payload locally
    pub async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        payload: Map<String, Value>,
    ) -> Result<Record> {
        if self.replica.get(kind, id).await?.is_none() {
            return Err(SyncError::RecordNotFound(id.to_string()));
        }

        let record = Record::with_id(id, payload);
        self.replica
            .write_local(kind, Operation::Update, &record)
            .await?;
        debug!("Updated {} {} locally", kind, id);
        self.nudge();
        Ok(record)
    }

    /// Delete a record locally and queue the remote delete
    pub async fn delete(&self, kind: EntityKind, id: &str) -> Result<()> {
        let existing = self
            .replica
            .get(kind, id)
            .await?
            .ok_or_else(|| SyncError::RecordNotFound(id.to_string()))?;

        self.replica
            .write_local(kind, Operation::Delete, &existing.pending())
            .await?;
        debug!("Deleted {} {} locally", kind, id);
        self.nudge();
        Ok(())
    }

    pub async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Record>> {
        self.replica.get(kind, id).await
    }

    pub async fn query(&self, kind: EntityKind, query: &RecordQuery) -> Result<Vec<Record>> {
        self.replica.query(kind, query).await
    }

    /// Ask the worker for a cycle if we are online and writes push eagerly
    fn nudge(&self) {
        if !self.config.push_on_write || !self.monitor.get_status() {
            return;
        }
        if let Some(tx) = &self.command_tx {
            if tx
                .try_send(SyncCommand::SyncNow(self.config.default_strategy))
                .is_err()
            {
                debug!("Sync worker busy; write will go out with the next cycle");
            }
        }
    }
}

async fn run_worker(
    orchestrator: Arc<SyncOrchestrator>,
    mut rx: mpsc::Receiver<SyncCommand>,
    periodic: Option<Duration>,
) {
    let mut schedule = periodic.map(periodic_interval);

    loop {
        tokio::select! {
            _ = next_tick(&mut schedule), if schedule.is_some() => {
                if orchestrator.is_online() && !orchestrator.is_syncing() {
                    debug!("Starting periodic sync");
                    orchestrator.sync_data(orchestrator.default_strategy()).await;
                }
            }

            cmd = rx.recv() => {
                match cmd {
                    Some(SyncCommand::SyncNow(strategy)) => {
                        info!("Manual sync triggered");
                        orchestrator.sync_data(strategy).await;
                    }
                    Some(SyncCommand::NetworkChanged(online)) => {
                        orchestrator.handle_network_change(online).await;
                    }
                    Some(SyncCommand::SchedulePeriodic(every)) => {
                        info!("Periodic sync every {:?}", every);
                        schedule = Some(periodic_interval(every));
                    }
                    Some(SyncCommand::StopPeriodic) => {
                        info!("Periodic sync stopped");
                        schedule = None;
                    }
                    Some(SyncCommand::Stop) | None => {
                        info!("Sync worker stopping");
                        break;
                    }
                }
            }
        }
    }
}

fn periodic_interval(every: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn next_tick(schedule: &mut Option<Interval>) {
    match schedule {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
