//! # Heartbeat and Connection Management
//!
//! Connection state transitions are driven entirely by the heartbeat cycle,
//! never by query submission: `DISCONNECTED -> CONNECTING -> CONNECTED`,
//! with error and shutdown side-states. A failed connection is retried
//! every heartbeat interval indefinitely and never escalates to a crash.

use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::engine::{mask_connection_string, ConnectionConfig, EngineConnection};

use super::core::DatabaseQueue;

/// Start heartbeat monitoring: stamp the timers and perform the immediate
/// initial connection attempt.
pub(crate) async fn start_heartbeat(queue: &Arc<DatabaseQueue>) {
    queue.touch_heartbeat();
    queue.touch_connection_attempt();

    let label = queue.label();
    if check_connection(queue).await {
        trace!(dqm = %label, "Connection attempt: SUCCESS");
    } else {
        error!(dqm = %label, "Connection attempt: FAILED");
        error!(
            dqm = %label,
            connection = %mask_connection_string(queue.connection_string()),
            engine = %queue.engine_kind(),
            "Connection details"
        );
    }
}

/// Attempt to establish the persistent connection: parse the connection
/// string, resolve the engine by inferred kind, connect, install the handle
/// under the connection lock (releasing any prior handle first), and health
/// check it in place. Every failure path still signals "initial connection
/// attempt complete" so startup waiting on this queue never blocks forever.
pub(crate) async fn check_connection(queue: &Arc<DatabaseQueue>) -> bool {
    let label = queue.label();
    let config = ConnectionConfig::parse(queue.connection_string());

    let engine = match queue.engines.get(queue.engine_kind()) {
        Ok(engine) => engine,
        Err(e) => {
            error!(dqm = %label, error = %e, "No engine available for connection");
            queue.set_connected(false);
            queue.touch_connection_attempt();
            queue.signal_initial_connection_complete();
            return false;
        }
    };

    trace!(
        dqm = %label,
        connection = %mask_connection_string(queue.connection_string()),
        "Attempting database connection"
    );

    let handle = match engine.connect(&config).await {
        Ok(handle) => handle,
        Err(e) => {
            error!(dqm = %label, error = %e, "Database connection failed");
            queue.set_connected(false);
            queue.touch_connection_attempt();
            queue.signal_initial_connection_complete();
            return false;
        }
    };

    debug!(dqm = %label, "Database connection established successfully");
    let success = handle_connection_success(queue, handle).await;
    queue.touch_connection_attempt();
    queue.signal_initial_connection_complete();
    success
}

/// Install a freshly connected handle and verify it with a health check.
/// A handle that fails its first health check is discarded immediately.
async fn handle_connection_success(
    queue: &Arc<DatabaseQueue>,
    handle: Box<dyn EngineConnection>,
) -> bool {
    let label = queue.label();

    let healthy = {
        let mut guard = queue.connection.lock().await;
        // At most one live connection per queue: release the old handle
        // before installing the new one
        if let Some(mut old) = guard.take() {
            let _ = old.disconnect().await;
        }
        *guard = Some(handle);
        match guard.as_mut() {
            Some(conn) => conn.health_check().await,
            None => false,
        }
    };

    debug!(
        dqm = %label,
        result = if healthy { "PASSED" } else { "FAILED" },
        "Health check completed"
    );

    if !healthy {
        error!(
            dqm = %label,
            "Health check failed after connection establishment - connection may be unstable"
        );
        let mut guard = queue.connection.lock().await;
        if let Some(mut bad) = guard.take() {
            let _ = bad.disconnect().await;
        }
        drop(guard);
        queue.set_connected(false);
        return false;
    }

    queue.set_connected(true);

    // Re-run the bootstrap query on reconnection. The initial bootstrap is
    // sequenced by the Lead conductor after connection establishment.
    if queue.is_lead_queue() && queue.bootstrap_completed() {
        queue.execute_bootstrap_query().await;
    }

    true
}

/// Perform one heartbeat: health-check the persistent connection in place,
/// reconnect when it is missing or unhealthy, and log the resulting state.
/// Lead queues additionally run child-queue management and sweep expired
/// pending results.
pub(crate) async fn perform_heartbeat(queue: &Arc<DatabaseQueue>) {
    // No-op during teardown; guards against races with shutdown
    if queue.shutdown_requested() {
        return;
    }

    queue.touch_heartbeat();
    let label = queue.label();
    let was_connected = queue.is_connected();

    let needs_reconnect = {
        let mut guard = queue.connection.lock().await;
        let healthy = match guard.as_mut() {
            Some(conn) => conn.health_check().await,
            None => false,
        };
        if guard.is_some() && !healthy {
            warn!(dqm = %label, "Persistent connection failed health check - discarding");
            if let Some(mut bad) = guard.take() {
                let _ = bad.disconnect().await;
            }
        }
        !healthy
    };

    let is_connected = if needs_reconnect {
        check_connection(queue).await
    } else {
        true
    };
    queue.set_connected(is_connected);

    // Always log heartbeat activity to show the queue is alive
    trace!(
        dqm = %label,
        connection = if is_connected { "OK" } else { "FAILED" },
        depth = queue.depth(),
        "Heartbeat"
    );

    if was_connected != is_connected {
        if is_connected {
            trace!(dqm = %label, "Database connection established");
        } else {
            warn!(dqm = %label, "Database connection lost - will retry");
        }
    }

    if queue.is_lead_queue() {
        super::lead::manage_child_queues(queue);

        let cleaned = queue.pending.cleanup_expired();
        if cleaned > 0 {
            debug!(dqm = %label, cleaned, "Cleaned up expired pending results");
        }
    }
}
