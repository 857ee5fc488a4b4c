//! SQLite queue persistence across restarts

use std::sync::Arc;

use garage_sync::client::local_db::QueueStore;
use garage_sync::client::offline::MutationQueue;
use garage_sync::client::{LocalDatabase, OfflineManager};
use garage_sync::shared::{AppConfig, FieldMap, MutationState, SchemaRegistry, SyncError};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::common::{fields, FakeRemote};

#[tokio::test]
async fn test_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("queue.db");
    let remote = Arc::new(FakeRemote::new());
    remote.set_entity("job", "J-1", fields(&[("memo", json!(""))]));

    let (first, second) = {
        let store = Arc::new(LocalDatabase::open(&db_path).await.unwrap());
        let manager = OfflineManager::open(AppConfig::default(), store, remote.clone(), None)
            .await
            .unwrap();
        manager.set_native_status(false);

        let first = manager
            .enqueue("job", "J-1", fields(&[("memo", json!(""))]), fields(&[("memo", json!("noise at idle"))]))
            .await
            .unwrap();
        let second = manager
            .enqueue("work_order", "W-1", FieldMap::new(), fields(&[("parts_cost", json!(8800))]))
            .await
            .unwrap();
        manager.dispose().await;
        (first, second)
    };

    let store = Arc::new(LocalDatabase::open(&db_path).await.unwrap());
    assert_eq!(store.count().await.unwrap(), 2);

    let manager = OfflineManager::open(AppConfig::default(), store, remote.clone(), None)
        .await
        .unwrap();
    let restored: Vec<_> = manager.queue().list_pending().await.iter().map(|m| m.id).collect();
    assert_eq!(restored, vec![first, second]);
    assert_eq!(manager.view("job", "J-1").await["memo"], json!("noise at idle"));

    let result = manager.manual_sync().await;
    assert_eq!(result.succeeded.len(), 2);
    assert!(manager.queue().is_empty().await);
    assert_eq!(remote.entity("job", "J-1")["memo"], json!("noise at idle"));
}

#[tokio::test]
async fn test_conflicted_mutation_reloads_as_pending() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("queue.db");
    let schema = Arc::new(SchemaRegistry::workshop());

    let id = {
        let store = Arc::new(LocalDatabase::open(&db_path).await.unwrap());
        let queue = MutationQueue::open(store, Arc::clone(&schema)).await.unwrap();
        let id = queue
            .enqueue("job", "J-9", FieldMap::new(), fields(&[("assigned_mechanic", json!("ito"))]))
            .await
            .unwrap();
        queue.mark_conflicted(&id).await.unwrap();
        id
    };

    let store = Arc::new(LocalDatabase::open(&db_path).await.unwrap());
    let queue = MutationQueue::open(store, schema).await.unwrap();
    assert_eq!(queue.get(&id).await.unwrap().state, MutationState::Pending);
}

#[tokio::test]
async fn test_corrupt_row_resets_queue() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("queue.db");

    let store = Arc::new(LocalDatabase::open(&db_path).await.unwrap());
    sqlx::query(
        "INSERT INTO mutation_queue (position, id, entity_type, entity_id, payload, saved_at)
         VALUES (0, 'broken', 'job', 'J-1', '{not json', '2026-10-16T00:00:00Z')",
    )
    .execute(store.pool())
    .await
    .unwrap();
    assert!(matches!(store.load().await, Err(SyncError::Corruption { .. })));

    let queue = MutationQueue::open(store.clone(), Arc::new(SchemaRegistry::workshop()))
        .await
        .unwrap();
    assert!(queue.is_empty().await);
    assert_eq!(store.count().await.unwrap(), 0);

    // New work is accepted right away.
    queue
        .enqueue("job", "J-1", FieldMap::new(), fields(&[("memo", json!("fresh start"))]))
        .await
        .unwrap();
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_unreadable_database_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("queue.db");
    std::fs::write(&db_path, "not a database, just a stray text file\n".repeat(64)).unwrap();

    let remote = Arc::new(FakeRemote::new());
    let store = Arc::new(LocalDatabase::open(&db_path).await.unwrap());
    let manager = OfflineManager::open(AppConfig::default(), store.clone(), remote.clone(), None)
        .await
        .unwrap();
    assert!(manager.queue().is_empty().await);

    // The unreadable file is kept next to the new one.
    let quarantined: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("queue.db.corrupt-"))
        .collect();
    assert_eq!(quarantined.len(), 1);

    manager
        .enqueue("job", "J-1", FieldMap::new(), fields(&[("memo", json!("after reset"))]))
        .await
        .unwrap();
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_missing_queue_table_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("queue.db");
    let schema = Arc::new(SchemaRegistry::workshop());

    {
        let store = Arc::new(LocalDatabase::open(&db_path).await.unwrap());
        let queue = MutationQueue::open(store.clone(), Arc::clone(&schema)).await.unwrap();
        queue
            .enqueue("job", "J-1", FieldMap::new(), fields(&[("memo", json!("lost"))]))
            .await
            .unwrap();
        sqlx::query("DROP TABLE mutation_queue")
            .execute(store.pool())
            .await
            .unwrap();
    }

    let store = Arc::new(LocalDatabase::open(&db_path).await.unwrap());
    let queue = MutationQueue::open(store.clone(), schema).await.unwrap();
    assert!(queue.is_empty().await);

    queue
        .enqueue("job", "J-2", FieldMap::new(), fields(&[("memo", json!("kept"))]))
        .await
        .unwrap();
    assert_eq!(store.count().await.unwrap(), 1);
}
