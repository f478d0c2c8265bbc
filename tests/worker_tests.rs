//! Worker lifecycle and processing tests: start/stop joins the task, and a
//! burst of submissions is processed one query at a time with depth and
//! counters balancing exactly.

mod common;

use std::time::Duration;

use dqm_core::query::DatabaseQuery;
use dqm_core::queue::ConductorState;

use common::{fake_db_engine, mock_entry, mock_manager, wait_until, FakeQueriesDb};

#[tokio::test]
async fn start_then_stop_joins_the_worker() {
    let db = FakeQueriesDb::new();
    let manager = mock_manager(fake_db_engine(db), 4);

    let lead = manager.add_database(&mock_entry("orders")).await.unwrap();
    assert!(lead.worker_started());

    assert!(
        lead.wait_for_initial_connection(Duration::from_secs(5)).await,
        "initial connection attempt should complete"
    );

    lead.stop_worker().await;
    assert!(!lead.worker_started());

    // Stopping again is harmless
    lead.stop_worker().await;
    assert!(!lead.worker_started());

    manager.shutdown_all().await;
}

#[tokio::test]
async fn stop_worker_from_another_task() {
    let db = FakeQueriesDb::new();
    let manager = mock_manager(fake_db_engine(db), 4);
    let lead = manager.add_database(&mock_entry("orders")).await.unwrap();

    let stopper = lead.clone();
    tokio::spawn(async move {
        stopper.stop_worker().await;
    })
    .await
    .unwrap();

    assert!(!lead.worker_started());
    manager.shutdown_all().await;
}

#[tokio::test]
async fn burst_of_queries_processes_one_at_a_time() {
    let db = FakeQueriesDb::new();
    let manager = mock_manager(fake_db_engine(db), 4);
    let lead = manager.add_database(&mock_entry("orders")).await.unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || {
            lead.conductor_state() == ConductorState::Completed
        })
        .await,
        "conductor sequence should complete"
    );
    let processed_baseline = lead.total_queries_processed();

    const BURST: usize = 25;
    for i in 0..BURST {
        let query = DatabaseQuery::new("SELECT query_ref, query_type, sql_template FROM queries", 1)
            .with_query_id(format!("burst-{i}"));
        manager.submit_query("orders", &query).unwrap();
    }

    assert!(
        wait_until(Duration::from_secs(10), || {
            lead.total_queries_processed() == processed_baseline + BURST as u64
        })
        .await,
        "all {BURST} queries should be processed"
    );
    assert_eq!(lead.own_depth(), 0);

    manager.shutdown_all().await;
}

#[tokio::test]
async fn submissions_route_to_matching_children() {
    let db = FakeQueriesDb::new();
    let manager = mock_manager(fake_db_engine(db), 4);

    let mut entry = mock_entry("orders");
    entry.queues.fast.start = 1;
    let lead = manager.add_database(&entry).await.unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || {
            lead.conductor_state() == ConductorState::Completed
        })
        .await
    );
    assert_eq!(lead.child_queue_count(), 1);
    let fast_child = lead.children_snapshot()[0].clone();

    for i in 0..5 {
        let query = DatabaseQuery::new("SELECT 1", 2).with_query_id(format!("fast-{i}"));
        manager.submit_query("orders", &query).unwrap();
    }

    assert!(
        wait_until(Duration::from_secs(10), || {
            fast_child.total_queries_processed() >= 5
        })
        .await,
        "fast child should process the hinted submissions"
    );

    manager.shutdown_all().await;
}

#[tokio::test]
async fn await_result_times_out_without_a_signal() {
    let db = FakeQueriesDb::new();
    let manager = mock_manager(fake_db_engine(db), 4);
    let lead = manager.add_database(&mock_entry("orders")).await.unwrap();

    // Nothing was submitted under this id, so the wait must end at the
    // deadline rather than blocking indefinitely
    match lead.await_result("never-submitted", 1).await.unwrap() {
        dqm_core::pending::WaitOutcome::TimedOut => {}
        other => panic!("unexpected outcome: {other:?}"),
    }

    manager.shutdown_all().await;
}
