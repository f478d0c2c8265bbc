//! Allocation-balance test: creating and destroying a full queue hierarchy
//! must not leak queues, worker tasks, or FIFOs. Kept in its own binary so
//! the process-wide allocation counters see only this test's activity.

mod common;

use std::time::Duration;

use dqm_core::queue::{queue_allocation_count, queue_deallocation_count, ConductorState};

use common::{fake_db_engine, mock_entry, mock_manager, wait_until, FakeQueriesDb};

#[tokio::test]
async fn create_destroy_balances_allocations() {
    let before_alloc = queue_allocation_count();
    let before_dealloc = queue_deallocation_count();

    {
        let db = FakeQueriesDb::new();
        let manager = mock_manager(fake_db_engine(db), 4);

        let mut entry = mock_entry("orders");
        entry.queues.fast.start = 2;
        entry.queues.slow.start = 1;
        let lead = manager.add_database(&entry).await.unwrap();

        assert!(
            wait_until(Duration::from_secs(10), || {
                lead.conductor_state() == ConductorState::Completed
            })
            .await
        );
        assert_eq!(lead.child_queue_count(), 3);

        manager.shutdown_all().await;
        assert!(!lead.worker_started());
        drop(lead);
        drop(manager);
    }

    // 1 Lead + 3 workers were allocated and all must be deallocated
    let allocated = queue_allocation_count() - before_alloc;
    let deallocated = queue_deallocation_count() - before_dealloc;
    assert_eq!(allocated, 4);
    assert_eq!(deallocated, allocated, "queue allocations must balance");
}

#[tokio::test]
async fn failed_registration_leaves_no_queue_behind() {
    let db = FakeQueriesDb::new();
    let manager = mock_manager(fake_db_engine(db), 4);

    let mut entry = mock_entry("orders");
    entry.engine = "not-an-engine".to_string();
    assert!(manager.add_database(&entry).await.is_err());
    assert_eq!(manager.database_count(), 0);

    manager.shutdown_all().await;
}
