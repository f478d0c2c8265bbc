//! # Lead Conductor
//!
//! The extra behaviors a Lead queue performs once at startup, layered on
//! top of the generic queue structure:
//!
//! 1. establish the database connection
//! 2. bootstrap (synchronization point - the query runs as part of
//!    connection establishment)
//! 3. migration (gated by `auto_migration`)
//! 4. migration test / reverse (gated independently by `test_migration`)
//! 5. launch the configured worker queues
//!
//! The sequence runs exactly once per Lead, tracked by an explicit
//! state machine so re-entry is impossible even across reconnects.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, error, info, trace};

use crate::constants::{QueueKind, CHILD_SHUTDOWN_GRACE};
use crate::error::{DqmError, Result};
use crate::migration;

use super::core::{ConductorState, DatabaseQueue};
use super::heartbeat;

/// Run the one-time conductor sequence. Gated by the conductor state
/// machine: only the first caller transitions NotStarted -> Running; a
/// completed sequence never re-runs.
pub(crate) async fn run_conductor_sequence(queue: &Arc<DatabaseQueue>) {
    let Some(lead) = queue.lead_state() else {
        return;
    };

    if lead
        .conductor_state
        .compare_exchange(
            ConductorState::NotStarted as u8,
            ConductorState::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        )
        .is_err()
    {
        return;
    }

    let label = queue.label();

    // 1. Establish connection; abort the rest of the sequence on failure.
    // The heartbeat keeps retrying the connection, but the conductor does
    // not re-run.
    let connected = queue.is_connected() || heartbeat::check_connection(queue).await;
    if !connected {
        error!(dqm = %label, "Connection establishment failed - aborting conductor sequence");
        lead.conductor_state
            .store(ConductorState::NotStarted as u8, Ordering::SeqCst);
        return;
    }

    // 2. Bootstrap synchronization point: the bootstrap query is executed
    // during connection establishment on reconnects; ensure it has run at
    // least once before migrations consult the watermarks.
    run_bootstrap(queue).await;

    // 3 & 4. Migration phases, each gated by its own configuration flag
    run_migration(queue).await;
    run_migration_test(queue).await;

    // 5. Launch additional queues
    launch_additional_queues(queue).await;

    lead.conductor_state
        .store(ConductorState::Completed as u8, Ordering::SeqCst);
    info!(dqm = %label, "Lead DQM initialization is complete for {}", queue.database_name());
}

/// Ensure the bootstrap query has completed at least once.
async fn run_bootstrap(queue: &Arc<DatabaseQueue>) {
    trace!(dqm = %queue.label(), "Running bootstrap query");
    if !queue.bootstrap_completed() {
        queue.execute_bootstrap_query().await;
    }
}

/// Run the migration sequence when `auto_migration` is enabled. The
/// connection lock is held for the entire run - migrations never execute
/// concurrently with a second migration pass or with query processing.
async fn run_migration(queue: &Arc<DatabaseQueue>) {
    let label = queue.label();
    trace!(dqm = %label, "Running migration");

    if !queue.entry().auto_migration {
        debug!(dqm = %label, "Automatic migration disabled - skipping migration execution");
        return;
    }
    let Some(lead) = queue.lead_state() else {
        return;
    };

    debug!(dqm = %label, "Automatic migration enabled - importing migrations");
    let started = Instant::now();

    let mut guard = queue.connection.lock().await;
    let Some(conn) = guard.as_mut() else {
        error!(dqm = %label, "No persistent connection available for migration");
        return;
    };

    match migration::run_migration_cycles(
        &mut **conn,
        lead.migration_source.as_ref(),
        queue.entry(),
        queue.query_cache(),
        &lead.watermarks,
        &label,
    )
    .await
    {
        Ok(()) => {
            trace!(
                dqm = %label,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Migration completed"
            );
        }
        Err(e) => {
            // A failed migration aborts the phase; the conductor still
            // proceeds so the application remains queryable for diagnosis
            error!(dqm = %label, error = %e, "Migration failed");
        }
    }
}

/// Run the reverse/TEST migration phase when `test_migration` is enabled.
async fn run_migration_test(queue: &Arc<DatabaseQueue>) {
    let label = queue.label();
    trace!(dqm = %label, "Running migration test");

    if !queue.entry().test_migration {
        debug!(dqm = %label, "Test migration disabled - skipping migration test");
        return;
    }
    let Some(lead) = queue.lead_state() else {
        return;
    };

    debug!(dqm = %label, "Test migration enabled - reversing applied migrations");
    let started = Instant::now();
    let bootstrap_sql = queue.entry().bootstrap_query.clone().unwrap_or_default();

    let mut guard = queue.connection.lock().await;
    let Some(conn) = guard.as_mut() else {
        error!(dqm = %label, "No persistent connection available for migration test");
        return;
    };

    match migration::reverse::run_reverse_phase(
        &mut **conn,
        &bootstrap_sql,
        queue.query_cache(),
        &lead.watermarks,
        queue.database_name(),
        &label,
    )
    .await
    {
        Ok(reversed) => {
            debug!(
                dqm = %label,
                reversed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Migration test completed"
            );
        }
        Err(e) => {
            error!(dqm = %label, error = %e, "Migration test failed");
        }
    }
}

/// Spawn the configured starting count of each worker type.
async fn launch_additional_queues(queue: &Arc<DatabaseQueue>) {
    let label = queue.label();
    trace!(dqm = %label, "Launching additional queues");

    for kind in QueueKind::WORKER_KINDS {
        let count = queue.entry().queues.start_count(kind);
        for _ in 0..count {
            if let Err(e) = spawn_child_queue(queue, kind) {
                error!(dqm = %label, kind = %kind, error = %e, "Failed to spawn child queue");
            }
        }
    }
}

/// Spawn one child queue of the given type. The children lock is held for
/// the entire operation - allocate, number, start worker, append - so a
/// half-built child is never reachable; if the worker fails to start the
/// child is discarded before the lock is released.
pub fn spawn_child_queue(
    lead_queue: &Arc<DatabaseQueue>,
    kind: QueueKind,
) -> Result<Arc<DatabaseQueue>> {
    let Some(lead) = lead_queue.lead_state() else {
        return Err(DqmError::queue_operation(
            lead_queue.label(),
            "spawn_child_queue",
            "only Lead queues can spawn children",
        ));
    };
    if kind == QueueKind::Lead {
        return Err(DqmError::queue_operation(
            lead_queue.label(),
            "spawn_child_queue",
            "cannot spawn a second Lead",
        ));
    }

    let label = lead_queue.label();
    let mut children = lead.children.lock();

    if children.len() >= lead.max_child_queues {
        return Err(DqmError::ChildQueueLimit {
            database: lead_queue.database_name().to_string(),
            count: children.len(),
            max: lead.max_child_queues,
        });
    }

    let child = DatabaseQueue::create_worker(lead_queue, kind)?;

    // Assign the smallest unused queue number; Lead keeps 00
    let mut number = 1;
    while children.iter().any(|c| c.queue_number() == number) {
        number += 1;
    }
    child.set_queue_number(number);

    if let Err(e) = child.start_worker() {
        error!(dqm = %label, error = %e, "Failed to start worker for child queue");
        return Err(e);
    }

    children.push(child.clone());
    trace!(dqm = %label, child = %child.label(), "Spawned child queue");
    Ok(child)
}

/// Shut down one child queue of the given type: signal all children to stop
/// without holding the lock so their tasks can exit, sleep briefly, then
/// re-acquire the lock to find-and-destroy the target, compacting the array
/// by swapping the last element into the removed slot.
pub async fn shutdown_child_queue(lead_queue: &Arc<DatabaseQueue>, kind: QueueKind) -> Result<()> {
    let Some(lead) = lead_queue.lead_state() else {
        return Err(DqmError::queue_operation(
            lead_queue.label(),
            "shutdown_child_queue",
            "only Lead queues own children",
        ));
    };

    let snapshot: Vec<Arc<DatabaseQueue>> = lead.children.lock().clone();
    for child in &snapshot {
        child.request_shutdown();
    }

    tokio::time::sleep(CHILD_SHUTDOWN_GRACE).await;

    let target = {
        let mut children = lead.children.lock();
        let index = children.iter().position(|c| c.queue_kind() == kind);
        index.map(|i| children.swap_remove(i))
    };

    match target {
        Some(child) => {
            child.stop_worker().await;
            child.release_connection().await;
            trace!(
                dqm = %lead_queue.label(),
                kind = %kind,
                "Shutdown child queue"
            );
            Ok(())
        }
        None => Err(DqmError::queue_operation(
            lead_queue.label(),
            "shutdown_child_queue",
            format!("no {kind} child queue found"),
        )),
    }
}

/// Child-queue elasticity is deliberately disabled: scaling decisions while
/// queries are in flight can destroy a child out from under its users, so
/// children persist for the Lead's lifetime. Invoked from the heartbeat as
/// the designated hook point.
pub(crate) fn manage_child_queues(_lead_queue: &Arc<DatabaseQueue>) {}
