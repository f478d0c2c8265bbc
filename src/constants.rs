//! # System Constants
//!
//! Core constants and enums that define the operational boundaries of the
//! database queue subsystem: queue roles, migration type codes, and the
//! timing defaults shared by workers, heartbeats, and shutdown paths.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Queue type codes used on the wire as `queue_type_hint` values.
///
/// The hint doubles as the FIFO priority for the enqueued payload.
pub mod hints {
    pub const SLOW: i32 = 0;
    pub const MEDIUM: i32 = 1;
    pub const FAST: i32 = 2;
    pub const CACHE: i32 = 3;
    pub const LEAD: i32 = 4;
}

/// Query cache entry type codes populated by bootstrap queries.
pub mod query_types {
    /// Forward migration script.
    pub const MIGRATION_FORWARD: i32 = 1000;
    /// Reverse/test migration script.
    pub const MIGRATION_REVERSE: i32 = 1001;
    /// Schema diagram entry.
    pub const DIAGRAM: i32 = 1002;
    /// Applied-migration marker.
    pub const MIGRATION_APPLIED: i32 = 1003;
}

/// Heartbeat interval used when a database entry does not configure one.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Bound on a single wait for work so shutdown is noticed promptly.
pub const WORKER_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Bound on joining a worker task during shutdown.
pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between signalling child workers to stop and destroying them.
pub const CHILD_SHUTDOWN_GRACE: Duration = Duration::from_millis(50);

/// Upper bound on migration cycles per conductor run.
pub const MAX_MIGRATION_CYCLES: u32 = 10;

/// Default capacity of the manager's Lead-queue registry.
pub const DEFAULT_MAX_DATABASES: usize = 10;

/// Default cap on child queues per Lead.
pub const DEFAULT_MAX_CHILD_QUEUES: usize = 20;

/// Default timeout applied to synchronous result waits.
pub const DEFAULT_QUERY_TIMEOUT_SECONDS: u64 = 30;

/// Statement delimiter used when a migration file carries multiple queries.
pub const QUERY_DELIMITER: &str = "-- QUERY DELIMITER\n";

/// Statement delimiter used inside a single migration's SQL template.
pub const SUBQUERY_DELIMITER: &str = "-- SUBQUERY DELIMITER\n";

/// Role of a [`DatabaseQueue`](crate::queue::DatabaseQueue) within its database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Lead,
    Slow,
    Medium,
    Fast,
    Cache,
}

impl QueueKind {
    /// The four worker roles a Lead may spawn, in launch order.
    pub const WORKER_KINDS: [QueueKind; 4] = [
        QueueKind::Cache,
        QueueKind::Fast,
        QueueKind::Medium,
        QueueKind::Slow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Lead => "Lead",
            QueueKind::Slow => "slow",
            QueueKind::Medium => "medium",
            QueueKind::Fast => "fast",
            QueueKind::Cache => "cache",
        }
    }

    /// Capability tag letter used in DQM labels.
    pub fn tag(&self) -> char {
        match self {
            QueueKind::Lead => 'L',
            QueueKind::Slow => 'S',
            QueueKind::Medium => 'M',
            QueueKind::Fast => 'F',
            QueueKind::Cache => 'C',
        }
    }

    /// Wire/priority code for this queue type.
    pub fn hint(&self) -> i32 {
        match self {
            QueueKind::Slow => hints::SLOW,
            QueueKind::Medium => hints::MEDIUM,
            QueueKind::Fast => hints::FAST,
            QueueKind::Cache => hints::CACHE,
            QueueKind::Lead => hints::LEAD,
        }
    }

    /// Map a wire hint back to a queue kind. Unknown hints route to Medium.
    pub fn from_hint(hint: i32) -> QueueKind {
        match hint {
            hints::SLOW => QueueKind::Slow,
            hints::FAST => QueueKind::Fast,
            hints::CACHE => QueueKind::Cache,
            hints::LEAD => QueueKind::Lead,
            _ => QueueKind::Medium,
        }
    }

    pub fn from_str_name(name: &str) -> Option<QueueKind> {
        match name {
            "Lead" => Some(QueueKind::Lead),
            "slow" => Some(QueueKind::Slow),
            "medium" => Some(QueueKind::Medium),
            "fast" => Some(QueueKind::Fast),
            "cache" => Some(QueueKind::Cache),
            _ => None,
        }
    }

    /// Index into per-kind statistics arrays.
    pub fn stats_index(&self) -> usize {
        match self {
            QueueKind::Slow => 0,
            QueueKind::Medium => 1,
            QueueKind::Fast => 2,
            QueueKind::Cache => 3,
            QueueKind::Lead => 4,
        }
    }

    /// Simulated per-query processing delay used when a queue has no
    /// persistent connection (bench/test mode).
    pub fn simulated_latency(&self) -> Duration {
        match self {
            QueueKind::Slow => Duration::from_millis(5),
            QueueKind::Medium => Duration::from_millis(2),
            QueueKind::Fast | QueueKind::Cache | QueueKind::Lead => Duration::from_millis(1),
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag string a freshly created Lead starts with: Lead plus every worker
/// capability it may delegate.
pub const LEAD_INITIAL_TAGS: &str = "LSMFC";
