//! Offline-first replication of items and billings against a REST backend.
//!
//! ```no_run
//! use billsync::{EntityKind, Strategy, SyncConfig, SyncManager};
//! use serde_json::json;
//!
//! # async fn run() -> billsync::Result<()> {
//! let mut manager = SyncManager::from_config(SyncConfig::from_env()?).await?;
//! manager.init().await;
//!
//! let payload = json!({"code": "A-1", "name": "Widget"});
//! manager
//!     .create(EntityKind::Items, payload.as_object().cloned().unwrap_or_default())
//!     .await?;
//!
//! let outcome = manager.sync_now(Strategy::Smart).await;
//! println!("{}", outcome.message);
//!
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod sync;

pub use client::{ChangeSet, HttpClient, HttpClientBuilder, RemoteApi};
pub use config::SyncConfig;
pub use error::{RemoteError, Result, SyncError};
pub use sync::{
    EntityKind, Record, Strategy, SyncManager, SyncOrchestrator, SyncOutcome, SyncPhase,
    SyncState, SyncStatus,
};
