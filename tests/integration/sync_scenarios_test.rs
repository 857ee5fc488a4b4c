//! End-to-end sync scenarios: offline edits, conflicts, failures and auto sync

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use garage_sync::client::sync::detect_conflicts;
use garage_sync::client::{MemoryQueueStore, ReconciliationResult};
use garage_sync::shared::{AppConfig, Conflict, ConflictResolution, FieldMap, MutationState, SyncError};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::common::{fields, offline_manager, offline_manager_with, FakeRemote};

#[tokio::test]
async fn test_status_change_syncs_and_empties_queue() {
    let remote = Arc::new(FakeRemote::new());
    remote.set_entity("job", "J-1", fields(&[("field5", json!("入庫済み"))]));
    let manager = offline_manager(Arc::clone(&remote)).await;

    manager
        .enqueue(
            "job",
            "J-1",
            fields(&[("field5", json!("入庫済み"))]),
            fields(&[("field5", json!("見積提示済み"))]),
        )
        .await
        .unwrap();
    assert_eq!(manager.sync_state().borrow().pending_count, 1);

    let result = manager.manual_sync().await;
    assert_eq!(result.succeeded.len(), 1);
    assert!(result.is_clean());
    assert!(manager.queue().is_empty().await);
    assert_eq!(manager.sync_state().borrow().pending_count, 0);
    assert_eq!(remote.entity("job", "J-1")["field5"], json!("見積提示済み"));
    assert_eq!(manager.view("job", "J-1").await["field5"], json!("見積提示済み"));
}

#[tokio::test]
async fn test_stale_price_is_detected_and_flagged() {
    let remote = Arc::new(FakeRemote::new());
    remote.set_entity("job", "J-1", fields(&[("price", json!(1000))]));
    let manager = offline_manager(Arc::clone(&remote)).await;

    let id = manager
        .enqueue("job", "J-1", fields(&[("price", json!(1000))]), fields(&[("price", json!(1000))]))
        .await
        .unwrap();

    // Another user edits the price before we sync.
    remote.set_entity("job", "J-1", fields(&[("price", json!(1200))]));

    let mutation = manager.queue().get(&id).await.unwrap();
    let conflicts = detect_conflicts(&mutation, &remote.entity("job", "J-1"));
    assert_eq!(
        conflicts,
        vec![Conflict {
            mutation_id: id,
            entity_type: "job".to_string(),
            entity_id: "J-1".to_string(),
            field: "price".to_string(),
            local_value: json!(1000),
            server_value: json!(1200),
            base_value: json!(1000),
        }]
    );

    // The default numeric merge keeps the local value but flags it.
    let result = manager.manual_sync().await;
    assert_eq!(result.succeeded, vec![id]);
    assert_eq!(result.flagged.len(), 1);
    assert_eq!(result.flagged[0].field, "price");
    assert_eq!(remote.entity("job", "J-1")["price"], json!(1000));
}

#[tokio::test]
async fn test_offline_memo_edits_collapse() {
    let remote = Arc::new(FakeRemote::new());
    let manager = offline_manager(Arc::clone(&remote)).await;
    manager.set_native_status(false);

    let first = manager
        .enqueue("job", "J-1", fields(&[("memo", json!(""))]), fields(&[("memo", json!("A"))]))
        .await
        .unwrap();
    let second = manager
        .enqueue("job", "J-1", fields(&[("memo", json!("A"))]), fields(&[("memo", json!("B"))]))
        .await
        .unwrap();

    assert_eq!(first, second);
    let queued = manager.queue().list_pending().await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].changes["memo"], json!("B"));
    assert_eq!(queued[0].base_snapshot["memo"], json!(""));

    // Nothing is sent while offline.
    let result = manager.manual_sync().await;
    assert!(result.succeeded.is_empty());
    assert_eq!(remote.calls(), 0);

    manager.set_native_status(true);
    let result = manager.manual_sync().await;
    assert_eq!(result.succeeded, vec![first]);
    assert_eq!(remote.updates()[0].changes, fields(&[("memo", json!("B"))]));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_timeouts_keep_mutation_queued() {
    let remote = Arc::new(FakeRemote::new());
    remote.set_hanging(true);
    let manager = offline_manager(Arc::clone(&remote)).await;

    let id = manager
        .enqueue("work_order", "W-7", FieldMap::new(), fields(&[("labor_hours", json!(2.5))]))
        .await
        .unwrap();

    let mut delays = Vec::new();
    for _ in 0..3 {
        let result = manager.manual_sync().await;
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].error, SyncError::Timeout(Duration::from_secs(15)));
        delays.push(manager.sync_manager().schedule().last_delay(&id).unwrap());
    }

    let mutation = manager.queue().get(&id).await.unwrap();
    assert_eq!(mutation.attempts, 3);
    assert_eq!(mutation.state, MutationState::Pending);
    assert!(mutation.last_error.is_some());
    assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]), "{delays:?}");
    assert!(delays.iter().all(|delay| *delay <= Duration::from_secs(30)));

    let state = manager.sync_state().borrow().clone();
    assert_eq!(state.pending_count, 1);
    assert!(state.last_error.is_some());
}

#[tokio::test]
async fn test_status_conflict_keeps_more_advanced_stage() {
    let remote = Arc::new(FakeRemote::new());
    remote.set_entity("job", "J-1", fields(&[("field5", json!("作業完了"))]));
    let manager = offline_manager(Arc::clone(&remote)).await;

    let id = manager
        .enqueue(
            "job",
            "J-1",
            fields(&[("field5", json!("入庫済み"))]),
            fields(&[("field5", json!("見積提示済み"))]),
        )
        .await
        .unwrap();

    let result = manager.manual_sync().await;
    assert_eq!(result.succeeded, vec![id]);
    assert!(result.conflicted.is_empty());
    assert_eq!(remote.entity("job", "J-1")["field5"], json!("作業完了"));
    assert_eq!(manager.view("job", "J-1").await["field5"], json!("作業完了"));
}

#[tokio::test]
async fn test_conflict_blocks_only_its_entity() {
    let remote = Arc::new(FakeRemote::new());
    remote.set_entity("job", "J-1", fields(&[("assigned_mechanic", json!("sato"))]));
    let manager = offline_manager(Arc::clone(&remote)).await;

    let suspended = manager
        .enqueue(
            "job",
            "J-1",
            fields(&[("assigned_mechanic", json!("tanaka"))]),
            fields(&[("assigned_mechanic", json!("suzuki"))]),
        )
        .await
        .unwrap();
    let result = manager.manual_sync().await;
    assert_eq!(result.conflicted, vec![suspended]);

    // A later edit to the same job queues behind the suspended mutation.
    let follow_up = manager
        .enqueue("job", "J-1", FieldMap::new(), fields(&[("memo", json!("waiting on parts"))]))
        .await
        .unwrap();
    assert_ne!(follow_up, suspended);
    let other = manager
        .enqueue("job", "J-2", FieldMap::new(), fields(&[("memo", json!("ready"))]))
        .await
        .unwrap();

    let result = manager.manual_sync().await;
    assert_eq!(result.succeeded, vec![other]);
    assert_eq!(result.deferred, vec![suspended, follow_up]);
    assert!(remote.updates().iter().all(|update| update.entity_id == "J-2"));

    // Keeping the server's mechanic completes the suspended mutation.
    let mut choices = HashMap::new();
    choices.insert(
        "assigned_mechanic".to_string(),
        ConflictResolution::KeepServer { resolved_value: json!("sato") },
    );
    let outcome = manager.resolve_conflicts(&suspended, choices).await.unwrap();
    assert_eq!(outcome, ReconciliationResult::Completed);
    assert_eq!(manager.view("job", "J-1").await["assigned_mechanic"], json!("sato"));

    let result = manager.manual_sync().await;
    assert_eq!(result.succeeded, vec![follow_up]);
    assert!(manager.queue().is_empty().await);
}

#[tokio::test]
async fn test_resolution_requires_every_field() {
    let remote = Arc::new(FakeRemote::new());
    remote.set_entity(
        "job",
        "J-1",
        fields(&[("assigned_mechanic", json!("sato")), ("delivery_date", json!("2026-10-20"))]),
    );
    let manager = offline_manager(Arc::clone(&remote)).await;

    let id = manager
        .enqueue(
            "job",
            "J-1",
            fields(&[("assigned_mechanic", json!("tanaka")), ("delivery_date", json!("2026-10-18"))]),
            fields(&[("assigned_mechanic", json!("suzuki")), ("delivery_date", json!("2026-10-19"))]),
        )
        .await
        .unwrap();
    manager.manual_sync().await;
    assert_eq!(manager.pending_conflicts().await.len(), 2);

    let mut choices = HashMap::new();
    choices.insert(
        "assigned_mechanic".to_string(),
        ConflictResolution::KeepLocal { resolved_value: json!("suzuki") },
    );
    let result = manager.resolve_conflicts(&id, choices.clone()).await;
    assert_matches!(result, Err(SyncError::IncompleteResolution { missing, .. }) if missing == vec!["delivery_date".to_string()]);

    choices.insert(
        "delivery_date".to_string(),
        ConflictResolution::Merge { resolved_value: json!("2026-10-21"), needs_review: false },
    );
    assert_matches!(manager.resolve_conflicts(&id, choices).await, Ok(ReconciliationResult::Requeued(_)));

    manager.manual_sync().await;
    assert_eq!(
        remote.entity("job", "J-1"),
        fields(&[("assigned_mechanic", json!("suzuki")), ("delivery_date", json!("2026-10-21"))])
    );
}

#[tokio::test]
async fn test_rejection_rolls_back_and_can_be_retried() {
    let remote = Arc::new(FakeRemote::new());
    remote.set_entity("job", "J-1", fields(&[("price", json!(1000))]));
    let manager = offline_manager(Arc::clone(&remote)).await;
    manager.seed("job", "J-1", fields(&[("price", json!(1000))])).await;

    let id = manager
        .enqueue("job", "J-1", fields(&[("price", json!(1000))]), fields(&[("price", json!(-1))]))
        .await
        .unwrap();
    assert_eq!(manager.view("job", "J-1").await["price"], json!(-1));

    remote.fail_next(SyncError::validation(Some("price"), "HTTP 422: must be positive"));
    let result = manager.manual_sync().await;
    assert_eq!(result.failed.len(), 1);
    assert_eq!(manager.queue().get(&id).await.unwrap().state, MutationState::Rejected);
    assert_eq!(manager.view("job", "J-1").await["price"], json!(1000));
    assert!(manager.sync_state().borrow().last_error.as_deref().unwrap().contains("price"));

    // Rejected mutations are not retried on their own.
    let result = manager.manual_sync().await;
    assert_eq!(result.deferred, vec![id]);

    manager.retry_rejected(&id).await.unwrap();
    let result = manager.manual_sync().await;
    assert_eq!(result.succeeded, vec![id]);
    assert_eq!(remote.entity("job", "J-1")["price"], json!(-1));
}

#[tokio::test]
async fn test_discard_removes_suspended_mutation() {
    let remote = Arc::new(FakeRemote::new());
    remote.set_entity("job", "J-1", fields(&[("assigned_mechanic", json!("sato"))]));
    let manager = offline_manager(Arc::clone(&remote)).await;

    let id = manager
        .enqueue(
            "job",
            "J-1",
            fields(&[("assigned_mechanic", json!("tanaka"))]),
            fields(&[("assigned_mechanic", json!("suzuki"))]),
        )
        .await
        .unwrap();
    manager.manual_sync().await;
    assert_eq!(manager.conflict_sessions().await.len(), 1);

    assert!(manager.discard(&id).await.unwrap());
    assert!(manager.pending_conflicts().await.is_empty());
    assert!(manager.queue().is_empty().await);
    assert_eq!(manager.sync_state().borrow().conflicted_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_is_bounded_across_entities() {
    let remote = Arc::new(FakeRemote::new());
    remote.set_delay(Duration::from_secs(1));
    let manager = offline_manager(Arc::clone(&remote)).await;

    for n in 0..6 {
        manager
            .enqueue("job", &format!("J-{n}"), FieldMap::new(), fields(&[("memo", json!(n))]))
            .await
            .unwrap();
    }

    let result = manager.manual_sync().await;
    assert_eq!(result.succeeded.len(), 6);
    assert_eq!(remote.max_in_flight(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_stop_auto_sync_waits_for_inflight_drain() {
    let remote = Arc::new(FakeRemote::new());
    remote.set_delay(Duration::from_secs(5));
    let manager = offline_manager(Arc::clone(&remote)).await;
    manager
        .enqueue("job", "J-1", FieldMap::new(), fields(&[("memo", json!("tyres rotated"))]))
        .await
        .unwrap();

    let mut state = manager.sync_state();
    assert!(manager.start_auto_sync(Duration::from_secs(3600)));
    assert!(!manager.start_auto_sync(Duration::from_secs(3600)));
    state.wait_for(|s| s.is_syncing).await.unwrap();

    manager.stop_auto_sync().await;
    assert!(!manager.sync_manager().is_auto_syncing());
    assert_eq!(remote.updates().len(), 1);
    assert!(manager.queue().is_empty().await);
    assert!(!manager.sync_state().borrow().is_syncing);
}

#[tokio::test]
async fn test_auto_sync_drains_when_back_online() {
    let remote = Arc::new(FakeRemote::new());
    let config = AppConfig::builder().sync_interval_secs(3600).build().unwrap();
    let manager = offline_manager_with(Arc::clone(&remote), config, Arc::new(MemoryQueueStore::new())).await;

    manager.set_native_status(false);
    manager
        .enqueue("work_order", "W-1", FieldMap::new(), fields(&[("parts_cost", json!(12000))]))
        .await
        .unwrap();
    manager.start_auto_sync(manager.config().sync_interval());

    let mut state = manager.sync_state();
    manager.set_native_status(true);
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| s.is_online && s.pending_count == 0 && s.last_sync_at.is_some()),
    )
    .await
    .expect("drain after reconnect")
    .unwrap();

    assert_eq!(remote.entity("work_order", "W-1")["parts_cost"], json!(12000));
    manager.dispose().await;
}
