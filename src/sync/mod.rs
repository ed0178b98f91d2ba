//! Offline-first synchronization
//!
//! This module provides:
//! - A SQLite replica of items and billings with per-record sync status
//! - A durable outbound queue of unacknowledged mutations
//! - Connectivity tracking with transition-only notifications
//! - Deterministic conflict resolution (smart, local, server)
//! - A single-flight sync cycle: push queue, pull deltas, merge
//!
//! Architecture:
//! - Every local write lands in the replica and the queue in one step
//! - The server is reconciled only through [`SyncOrchestrator::sync_data`]
//! - [`SyncManager`] owns the background worker and the application API

pub mod connectivity;
mod listeners;
pub mod manager;
pub mod orchestrator;
pub mod queue;
pub mod record;
pub mod replica;
pub mod resolver;
pub mod store;

// Re-export key types
pub use connectivity::{ConnectivityMonitor, HttpProbe, ManualProbe, NetworkProbe};
pub use listeners::ListenerId;
pub use manager::{SyncCommand, SyncManager};
pub use orchestrator::{SyncFailure, SyncOrchestrator, SyncOutcome, SyncPhase, SyncState};
pub use queue::{Operation, QueueItem};
pub use record::{EntityKind, Record, SyncStatus};
pub use replica::Replica;
pub use resolver::{resolve_conflicts, Conflict, Resolution, Strategy, Winner};
pub use store::{LocalStore, RecordQuery};
