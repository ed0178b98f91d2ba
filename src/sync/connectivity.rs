//! Connectivity Monitor
//!
//! Tracks online/offline state and tells subscribers about genuine
//! transitions only. How reachability is determined is left to an injected
//! [`NetworkProbe`], so hosts and tests can drive transitions themselves.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::listeners::{ListenerId, Listeners};
use crate::client::HttpClient;

/// Source of truth for "can we reach the backend right now"
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Probes the backend's `/health` endpoint
pub struct HttpProbe {
    client: Arc<HttpClient>,
}

impl HttpProbe {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NetworkProbe for HttpProbe {
    async fn is_reachable(&self) -> bool {
        self.client.ping().await.unwrap_or(false)
    }
}

/// Probe whose answer is set from outside (OS reachability callbacks, tests)
#[derive(Debug, Default)]
pub struct ManualProbe {
    online: AtomicBool,
}

impl ManualProbe {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl NetworkProbe for ManualProbe {
    async fn is_reachable(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

pub struct ConnectivityMonitor {
    probe: Arc<dyn NetworkProbe>,
    online: AtomicBool,
    listeners: Listeners<bool>,
}

impl ConnectivityMonitor {
    /// Starts out offline until the first observation says otherwise
    pub fn new(probe: Arc<dyn NetworkProbe>) -> Self {
        Self {
            probe,
            online: AtomicBool::new(false),
            listeners: Listeners::new("connectivity"),
        }
    }

    pub fn get_status(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Register `cb(is_online)`, called on every transition
    pub fn add_listener<F>(&self, cb: F) -> ListenerId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.listeners.add(move |online: &bool| cb(*online))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Record an observation. Returns true when it was a transition.
    pub fn report(&self, online: bool) -> bool {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return false;
        }

        if online {
            info!("Connectivity restored");
        } else {
            warn!("Connectivity lost - queueing changes locally");
        }
        self.listeners.notify(&online);
        true
    }

    /// Ask the probe and record the answer
    pub async fn poll(&self) -> bool {
        let online = self.probe.is_reachable().await;
        debug!("Connectivity probe: online={}", online);
        self.report(online);
        online
    }

    /// Poll the probe on a fixed interval until the handle is aborted
    pub fn spawn_polling(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.poll().await;
            }
        })
    }
}
