//! Manager registry, selection fallback, synchronous submit/await, and the
//! completed query-status/cancellation capabilities.

mod common;

use std::time::Duration;

use dqm_core::error::DqmError;
use dqm_core::manager::QueryStatus;
use dqm_core::pending::WaitOutcome;
use dqm_core::query::DatabaseQuery;
use dqm_core::queue::ConductorState;

use common::{fake_db_engine, mock_entry, mock_manager, wait_until, FakeQueriesDb};

#[tokio::test]
async fn one_lead_per_database_name() {
    let db = FakeQueriesDb::new();
    let manager = mock_manager(fake_db_engine(db), 4);

    manager.add_database(&mock_entry("orders")).await.unwrap();
    let err = manager.add_database(&mock_entry("orders")).await.unwrap_err();
    assert!(matches!(err, DqmError::DatabaseAlreadyRegistered { .. }));
    assert_eq!(manager.database_count(), 1);

    manager.shutdown_all().await;
}

#[tokio::test]
async fn registry_capacity_is_bounded() {
    let db = FakeQueriesDb::new();
    let manager = mock_manager(fake_db_engine(db), 2);

    manager.add_database(&mock_entry("a")).await.unwrap();
    manager.add_database(&mock_entry("b")).await.unwrap();
    let err = manager.add_database(&mock_entry("c")).await.unwrap_err();
    assert!(matches!(err, DqmError::RegistryFull { .. }));

    manager.shutdown_all().await;
}

#[tokio::test]
async fn unknown_engine_fails_fast_without_a_queue() {
    let db = FakeQueriesDb::new();
    let manager = mock_manager(fake_db_engine(db), 4);

    let mut entry = mock_entry("orders");
    entry.engine = "oracle".to_string();
    let err = manager.add_database(&entry).await.unwrap_err();
    assert!(matches!(err, DqmError::Configuration { .. }));
    assert_eq!(manager.database_count(), 0);

    manager.shutdown_all().await;
}

#[tokio::test]
async fn unmatched_hint_falls_back_to_lead() {
    let db = FakeQueriesDb::new();
    let manager = mock_manager(fake_db_engine(db), 4);
    let lead = manager.add_database(&mock_entry("orders")).await.unwrap();

    // No children exist, so any hint resolves to the Lead
    let selected = manager.select_optimal_queue("orders", 2).unwrap();
    assert!(std::sync::Arc::ptr_eq(&selected, &lead));

    assert!(matches!(
        manager.select_optimal_queue("nope", 2),
        Err(DqmError::DatabaseNotFound { .. })
    ));

    manager.shutdown_all().await;
}

#[tokio::test]
async fn submit_and_await_delivers_the_result() {
    let db = FakeQueriesDb::new();
    db.insert(1000, 1000, "APPLY_MIGRATION 1000");
    let manager = mock_manager(fake_db_engine(db), 4);
    let lead = manager.add_database(&mock_entry("orders")).await.unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || {
            lead.conductor_state() == ConductorState::Completed
        })
        .await
    );

    let query = DatabaseQuery::new("SELECT query_ref, query_type, sql_template FROM queries", 1)
        .with_query_id("sync-1");
    match manager
        .submit_and_await("orders", &query, Some(10))
        .await
        .unwrap()
    {
        WaitOutcome::Ready(Some(result)) => {
            assert!(result.success);
            assert_eq!(result.rows.len(), 1);
            assert_eq!(result.rows[0]["query_ref"], 1000);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    // The registration is consumed with the result
    assert_eq!(manager.query_status("sync-1"), QueryStatus::Unknown);

    manager.shutdown_all().await;
}

#[tokio::test]
async fn submit_and_await_to_missing_database_cleans_up() {
    let db = FakeQueriesDb::new();
    let manager = mock_manager(fake_db_engine(db), 4);

    let query = DatabaseQuery::new("SELECT 1", 1).with_query_id("orphan");
    let err = manager
        .submit_and_await("missing", &query, Some(5))
        .await
        .unwrap_err();
    assert!(matches!(err, DqmError::DatabaseNotFound { .. }));
    // Failed submission must not leak the pending registration
    assert!(manager.pending().is_empty());

    manager.shutdown_all().await;
}

#[tokio::test]
async fn cancellation_is_observable() {
    let db = FakeQueriesDb::new();
    let manager = mock_manager(fake_db_engine(db), 4);
    manager.add_database(&mock_entry("orders")).await.unwrap();

    let ticket_id = "to-cancel";
    assert_eq!(manager.query_status(ticket_id), QueryStatus::Unknown);
    manager.pending().register(ticket_id, 30).unwrap();
    assert_eq!(manager.query_status(ticket_id), QueryStatus::Pending);

    assert!(manager.cancel_query(ticket_id));
    assert_eq!(manager.query_status(ticket_id), QueryStatus::Unknown);
    assert!(!manager.cancel_query(ticket_id));

    manager.shutdown_all().await;
}

#[tokio::test]
async fn stats_track_submissions_and_completions() {
    let db = FakeQueriesDb::new();
    let manager = mock_manager(fake_db_engine(db), 4);
    let lead = manager.add_database(&mock_entry("orders")).await.unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || {
            lead.conductor_state() == ConductorState::Completed
        })
        .await
    );

    for i in 0..3 {
        let query = DatabaseQuery::new("SELECT 1", 1).with_query_id(format!("stat-{i}"));
        manager.submit_query("orders", &query).unwrap();
    }

    assert!(
        wait_until(Duration::from_secs(5), || {
            manager.stats().total_completed() >= 3
        })
        .await
    );

    let json = manager.stats_json();
    assert!(json["total_queries_submitted"].as_u64().unwrap() >= 3);
    assert_eq!(json["per_queue_stats"][1]["queue_type"], "medium");
    assert!(json["per_queue_stats"][1]["submitted"].as_u64().unwrap() >= 3);

    manager.shutdown_all().await;
}

#[tokio::test]
async fn remove_database_tears_down_the_hierarchy() {
    let db = FakeQueriesDb::new();
    let manager = mock_manager(fake_db_engine(db), 4);

    let mut entry = mock_entry("orders");
    entry.queues.cache.start = 1;
    let lead = manager.add_database(&entry).await.unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || {
            lead.conductor_state() == ConductorState::Completed
        })
        .await
    );
    assert_eq!(lead.child_queue_count(), 1);

    manager.remove_database("orders").await.unwrap();
    assert_eq!(manager.database_count(), 0);
    assert!(!lead.worker_started());
    assert_eq!(lead.child_queue_count(), 0);

    assert!(matches!(
        manager.remove_database("orders").await,
        Err(DqmError::DatabaseNotFound { .. })
    ));
}
