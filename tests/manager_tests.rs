//! Sync Manager Integration Tests
//!
//! Covers the background worker: connectivity-triggered cycles, write
//! nudges, the periodic schedule and lifecycle.

mod common;

use billsync::sync::{EntityKind, RecordQuery, Strategy, SyncStatus};
use billsync::{SyncConfig, SyncError};
use common::{create_test_manager, item, quiet_config, wait_for};
use std::time::Duration;

fn periodic_config(every_secs: u64) -> SyncConfig {
    SyncConfig {
        auto_sync: true,
        sync_interval_secs: every_secs,
        ..quiet_config()
    }
}

// ==================== Lifecycle ====================

#[tokio::test]
async fn test_init_syncs_when_first_probe_is_online() {
    let (mut manager, remote, probe) = create_test_manager(quiet_config(), false).await;
    manager
        .create(EntityKind::Items, item("A-1", "Widget"))
        .await
        .unwrap();

    probe.set(true);
    manager.init().await;
    assert!(manager.is_running());
    assert!(manager.is_online());

    assert!(wait_for(|| remote.fetch_count() == 1).await);
    assert_eq!(remote.push_count(), 1);

    manager.shutdown().await;
    assert!(!manager.is_running());
    assert_eq!(manager.replica().queue_len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_commands_after_shutdown_are_rejected() {
    let (mut manager, _remote, _probe) = create_test_manager(quiet_config(), true).await;
    manager.init().await;
    manager.shutdown().await;

    assert!(matches!(
        manager.schedule_periodic_sync(Duration::from_secs(5)).await,
        Err(SyncError::ManagerStopped)
    ));
    assert!(matches!(
        manager.stop_periodic_sync().await,
        Err(SyncError::ManagerStopped)
    ));
}

#[tokio::test]
async fn test_shutdown_unsubscribes_from_connectivity() {
    let (mut manager, remote, _probe) = create_test_manager(quiet_config(), false).await;
    manager.init().await;
    manager.shutdown().await;

    manager.set_online(true);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(remote.fetch_count(), 0);
}

// ==================== Connectivity ====================

#[tokio::test]
async fn test_going_online_triggers_sync() {
    let (mut manager, remote, _probe) = create_test_manager(quiet_config(), false).await;
    manager.init().await;

    let record = manager
        .create(EntityKind::Billings, item("B-1", "Invoice"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(remote.calls().is_empty());

    assert!(manager.set_online(true));
    assert!(wait_for(|| remote.fetch_count() == 1).await);

    // Repeated reports of the same state are not transitions
    assert!(!manager.set_online(true));

    manager.set_online(false);
    manager.set_online(true);
    assert!(wait_for(|| remote.fetch_count() == 2).await);

    manager.shutdown().await;
    let stored = manager
        .get(EntityKind::Billings, &record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_write_nudges_sync_when_online() {
    let config = SyncConfig {
        push_on_write: true,
        ..quiet_config()
    };
    let (mut manager, remote, _probe) = create_test_manager(config, true).await;
    manager.init().await;

    manager
        .create(EntityKind::Items, item("A-1", "Widget"))
        .await
        .unwrap();

    assert!(wait_for(|| remote.push_count() == 1).await);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_write_does_not_nudge_when_offline() {
    let config = SyncConfig {
        push_on_write: true,
        ..quiet_config()
    };
    let (mut manager, remote, _probe) = create_test_manager(config, false).await;
    manager.init().await;

    manager
        .create(EntityKind::Items, item("A-1", "Widget"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(remote.calls().is_empty());
    assert_eq!(manager.replica().queue_len().await.unwrap(), 1);
    manager.shutdown().await;
}

// ==================== Periodic ====================

#[tokio::test(start_paused = true)]
async fn test_periodic_sync_runs_until_stopped() {
    let (mut manager, remote, _probe) = create_test_manager(periodic_config(60), true).await;
    manager.init().await;

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(remote.fetch_count(), 1);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(remote.fetch_count(), 2);

    manager.stop_periodic_sync().await.unwrap();
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(remote.fetch_count(), 2);

    manager
        .schedule_periodic_sync(Duration::from_secs(10))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(remote.fetch_count(), 3);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_periodic_tick_is_skipped_while_offline() {
    let (mut manager, remote, _probe) = create_test_manager(periodic_config(30), false).await;
    manager.init().await;

    tokio::time::sleep(Duration::from_secs(95)).await;
    assert_eq!(remote.fetch_count(), 0);

    manager.shutdown().await;
}

// ==================== Application API ====================

#[tokio::test]
async fn test_update_and_delete_require_existing_record() {
    let (manager, _remote, _probe) = create_test_manager(quiet_config(), false).await;

    assert!(matches!(
        manager
            .update(EntityKind::Items, "missing", item("X", "X"))
            .await,
        Err(SyncError::RecordNotFound(_))
    ));
    assert!(matches!(
        manager.delete(EntityKind::Items, "missing").await,
        Err(SyncError::RecordNotFound(_))
    ));
    assert_eq!(manager.replica().queue_len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_query_sees_local_writes_immediately() {
    let (manager, _remote, _probe) = create_test_manager(quiet_config(), false).await;
    for (code, name) in [("INV-1", "Bolt"), ("INV-2", "Nut"), ("SRV-1", "Install")] {
        manager
            .create(EntityKind::Items, item(code, name))
            .await
            .unwrap();
    }

    let inventory = manager
        .query(EntityKind::Items, &RecordQuery::CodePrefix("inv".to_string()))
        .await
        .unwrap();
    assert_eq!(inventory.len(), 2);

    let pending = manager
        .query(EntityKind::Items, &RecordQuery::Status(SyncStatus::Pending))
        .await
        .unwrap();
    assert_eq!(pending.len(), 3);

    let outcome = manager.sync_now(Strategy::Smart).await;
    assert!(!outcome.success);
}
