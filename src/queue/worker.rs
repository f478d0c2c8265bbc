//! # Worker Task
//!
//! The single generic worker loop shared by every queue role. On entry it
//! starts heartbeat monitoring and, for a Lead whose one-time conductor
//! sequence has not run, executes the conductor exactly once. It then loops
//! until shutdown: run a heartbeat when the interval elapses, wait on the
//! work semaphore with a one-second bound so shutdown is noticed promptly,
//! and process exactly one query per wakeup - no intra-queue parallelism.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, error, trace};

use crate::constants::WORKER_WAIT_TIMEOUT;
use crate::engine::QueryRequest;
use crate::query::DatabaseQuery;

use super::core::DatabaseQueue;
use super::{heartbeat, lead};

pub(crate) async fn worker_main(queue: Arc<DatabaseQueue>) {
    let label = queue.label();
    trace!(dqm = %label, "Worker thread started");

    // Start heartbeat monitoring immediately; this performs the initial
    // connection attempt for every queue role.
    heartbeat::start_heartbeat(&queue).await;

    // Lead queues run the conductor sequence exactly once
    if queue.is_lead_queue() {
        lead::run_conductor_sequence(&queue).await;
    }

    // Main worker loop - stay alive until shutdown is requested
    while !queue.shutdown_requested() {
        if queue.heartbeat_due() {
            heartbeat::perform_heartbeat(&queue).await;
        }

        // Bounded wait so shutdown is noticed within a second even when no
        // work arrives
        match timeout(WORKER_WAIT_TIMEOUT, queue.work_signal.acquire()).await {
            Ok(Ok(permit)) => {
                permit.forget();
                // Re-check shutdown after waking; the permit may be the
                // shutdown wakeup itself
                if !queue.shutdown_requested() {
                    process_single_query(&queue).await;
                }
            }
            Ok(Err(_closed)) => break,
            Err(_elapsed) => {}
        }
    }

    trace!(dqm = %label, "Worker thread exiting");
}

/// Dequeue and process exactly one query. Completion - success, failure, or
/// simulated - signals any pending registration for the query id; ownership
/// of the result transfers to the pending slot.
pub(crate) async fn process_single_query(queue: &Arc<DatabaseQueue>) {
    let Some(payload) = queue.fifo.dequeue() else {
        return;
    };
    queue.depth.fetch_sub(1, Ordering::SeqCst);

    let label = queue.label();
    let query = match DatabaseQuery::from_envelope(&payload) {
        Ok(query) => query,
        Err(e) => {
            error!(dqm = %label, error = %e, "Dropping undecodable queue payload");
            queue.stats.record_failure(queue.queue_kind());
            return;
        }
    };

    let query_id = query.query_id.clone();
    let mut result = None;
    let mut executed = false;

    {
        let mut guard = queue.connection.lock().await;
        if let Some(conn) = guard.as_mut() {
            executed = true;
            let mut request = QueryRequest::new(
                query_id.clone().unwrap_or_else(|| "anonymous".to_string()),
                query.query_template.clone(),
            );
            if let Some(params) = &query.parameter_json {
                request.parameters_json = params.clone();
            }
            if queue.entry.prepared_statement_cache_size > 0 {
                request.use_prepared_statement = true;
                request.prepared_statement_name =
                    Some(crate::migration::statement_hash("QPSC", &query.query_template, 16));
            }

            match conn.execute(&request).await {
                Ok(query_result) => {
                    trace!(
                        dqm = %label,
                        query_id = query_id.as_deref().unwrap_or("unknown"),
                        elapsed_ms = query_result.execution_time_ms,
                        "Query executed"
                    );
                    result = Some(query_result);
                }
                Err(e) => {
                    error!(
                        dqm = %label,
                        query_id = query_id.as_deref().unwrap_or("unknown"),
                        error = %e,
                        "Query execution failed"
                    );
                }
            }
        }
    }

    if !executed {
        // Bench/test mode: no persistent connection, simulate bounded
        // processing latency instead of executing
        debug!(
            dqm = %label,
            query_id = query_id.as_deref().unwrap_or("unknown"),
            "No persistent connection - simulating query processing"
        );
        tokio::time::sleep(queue.queue_kind().simulated_latency()).await;
    }

    queue.total_queries_processed.fetch_add(1, Ordering::SeqCst);
    match &result {
        Some(r) if r.success => queue
            .stats
            .record_completion(queue.queue_kind(), r.execution_time_ms),
        Some(_) | None if executed => queue.stats.record_failure(queue.queue_kind()),
        _ => queue.stats.record_completion(queue.queue_kind(), 0),
    }

    if let Some(id) = &query_id {
        queue.pending.signal_ready(id, result);
    }
}
