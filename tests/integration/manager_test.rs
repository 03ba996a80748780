//! Connection-manager invariants under concurrency.

use askdb::connection::{ConnectionConfig, ConnectionManager};
use askdb::handler::{BackendKind, MockHandler};
use std::sync::Arc;
use tempfile::TempDir;

fn sqlite_config(id: &str, dir: &TempDir) -> ConnectionConfig {
    let path = dir.path().join(format!("{id}.db"));
    ConnectionConfig::new(id, id, BackendKind::Sqlite)
        .with_option("filePath", path.to_str().unwrap())
        .with_option("mode", "readwritecreate")
}

// Active singleton: at most one connection is active, even when activations
// race from many tasks.
#[tokio::test]
async fn concurrent_activations_keep_single_active() {
    let dir = TempDir::new().unwrap();
    let manager = Arc::new(ConnectionManager::new());
    for id in ["a", "b", "c", "d"] {
        manager.create(sqlite_config(id, &dir)).await.unwrap();
    }

    let mut tasks = Vec::new();
    for id in ["a", "b", "c", "d", "a", "b", "c", "d"] {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move {
            manager.activate(id).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let snapshots = manager.list().await;
    assert_eq!(snapshots.iter().filter(|s| s.active).count(), 1);
    let active = manager.active().await.unwrap();
    assert!(snapshots
        .iter()
        .any(|s| s.active && s.config.id == active));
}

// Reads proceed while mutations are serialised; results stay consistent.
#[tokio::test]
async fn concurrent_reads_and_writes_do_not_corrupt_state() {
    let dir = TempDir::new().unwrap();
    let manager = Arc::new(ConnectionManager::new());
    manager.create(sqlite_config("base", &dir)).await.unwrap();
    manager.activate("base").await.unwrap();
    manager
        .execute("base", "CREATE TABLE t (x INTEGER)", None)
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..8 {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                let result = manager
                    .execute("base", "SELECT COUNT(*) AS n FROM t", None)
                    .await
                    .unwrap();
                assert!(result.success);
            } else {
                let _ = manager.list().await;
                let _ = manager.active().await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}

// Handlers installed by embedders participate in the same invariants.
#[tokio::test]
async fn install_replaces_active_pointer() {
    let manager = ConnectionManager::new();
    let first = ConnectionConfig::new("m1", "one", BackendKind::Sqlite)
        .with_option("filePath", "/tmp/a.db");
    let second = ConnectionConfig::new("m2", "two", BackendKind::Sqlite)
        .with_option("filePath", "/tmp/b.db");

    manager.install(first, Arc::new(MockHandler::new())).await;
    manager.install(second, Arc::new(MockHandler::new())).await;

    assert_eq!(manager.active().await.as_deref(), Some("m2"));
    assert_eq!(
        manager.list().await.iter().filter(|s| s.active).count(),
        1
    );
}

// Deactivate leaves the connection connected but not active.
#[tokio::test]
async fn deactivate_keeps_connection_alive() {
    let dir = TempDir::new().unwrap();
    let manager = ConnectionManager::new();
    manager.create(sqlite_config("a", &dir)).await.unwrap();
    manager.activate("a").await.unwrap();

    manager.deactivate("a").await;
    assert_eq!(manager.active().await, None);

    // Still executable by explicit id.
    let result = manager.execute("a", "SELECT 1 AS one", None).await.unwrap();
    assert!(result.success);
}
