//! # Database Queue Manager
//!
//! Registry of Lead queues, one per logical database name, with a capacity
//! bound and aggregate statistics. The manager is an explicit instance
//! constructed at startup and shared by `Arc` - there is no global state.
//!
//! Queue selection picks the queue with the smallest depth among those
//! matching the database name and queue-type hint, breaking ties by the
//! earliest last-request time (which round-robins naturally when depths are
//! equal), and falls back to the database's Lead queue when nothing matches.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{error, info};

use crate::config::{DatabaseEntry, DqmConfig};
use crate::constants::{QueueKind, DEFAULT_MAX_DATABASES};
use crate::engine::{ConnectionConfig, EngineRegistry};
use crate::error::{DqmError, Result};
use crate::pending::{PendingResultManager, PendingStatus, WaitOutcome};
use crate::query::DatabaseQuery;
use crate::queue::DatabaseQueue;

/// Per-queue-type counters.
#[derive(Default)]
pub struct QueueKindStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    avg_execution_time_ms: AtomicU64,
    last_used: AtomicI64,
}

impl QueueKindStats {
    fn to_json(&self, kind: &str) -> serde_json::Value {
        json!({
            "queue_type": kind,
            "submitted": self.submitted.load(Ordering::SeqCst),
            "completed": self.completed.load(Ordering::SeqCst),
            "failed": self.failed.load(Ordering::SeqCst),
            "avg_execution_time_ms": self.avg_execution_time_ms.load(Ordering::SeqCst),
            "last_used": self.last_used.load(Ordering::SeqCst),
        })
    }
}

/// Manager-wide statistics, shared with every queue so workers can record
/// completions without reaching back through the registry.
#[derive(Default)]
pub struct ManagerStats {
    total_submitted: AtomicU64,
    total_completed: AtomicU64,
    total_failed: AtomicU64,
    total_timeouts: AtomicU64,
    per_kind: [QueueKindStats; 5],
}

impl ManagerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submission(&self, kind: QueueKind) {
        self.total_submitted.fetch_add(1, Ordering::SeqCst);
        let stats = &self.per_kind[kind.stats_index()];
        stats.submitted.fetch_add(1, Ordering::SeqCst);
        stats.last_used.store(Utc::now().timestamp(), Ordering::SeqCst);
    }

    pub fn record_completion(&self, kind: QueueKind, execution_time_ms: u64) {
        self.total_completed.fetch_add(1, Ordering::SeqCst);
        let stats = &self.per_kind[kind.stats_index()];
        let completed = stats.completed.fetch_add(1, Ordering::SeqCst) + 1;
        // Simple moving average
        let current_avg = stats.avg_execution_time_ms.load(Ordering::SeqCst);
        let new_avg = if completed == 1 {
            execution_time_ms
        } else {
            (current_avg * (completed - 1) + execution_time_ms) / completed
        };
        stats.avg_execution_time_ms.store(new_avg, Ordering::SeqCst);
    }

    pub fn record_failure(&self, kind: QueueKind) {
        self.total_failed.fetch_add(1, Ordering::SeqCst);
        self.per_kind[kind.stats_index()]
            .failed
            .fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_timeout(&self) {
        self.total_timeouts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn total_submitted(&self) -> u64 {
        self.total_submitted.load(Ordering::SeqCst)
    }

    pub fn total_completed(&self) -> u64 {
        self.total_completed.load(Ordering::SeqCst)
    }

    pub fn total_failed(&self) -> u64 {
        self.total_failed.load(Ordering::SeqCst)
    }

    pub fn total_timeouts(&self) -> u64 {
        self.total_timeouts.load(Ordering::SeqCst)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let kinds = ["slow", "medium", "fast", "cache", "lead"];
        json!({
            "total_queries_submitted": self.total_submitted(),
            "total_queries_completed": self.total_completed(),
            "total_queries_failed": self.total_failed(),
            "total_timeouts": self.total_timeouts(),
            "per_queue_stats": kinds
                .iter()
                .enumerate()
                .map(|(i, kind)| self.per_kind[i].to_json(kind))
                .collect::<Vec<_>>(),
        })
    }
}

/// Final status of a query as observed through the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Pending,
    ResultReady,
    Cancelled,
    Unknown,
}

/// Registry of Lead queues with round-robin/least-loaded selection.
pub struct DatabaseQueueManager {
    databases: Mutex<Vec<Arc<DatabaseQueue>>>,
    max_databases: usize,
    default_query_timeout_seconds: u64,
    stats: Arc<ManagerStats>,
    engines: Arc<EngineRegistry>,
    pending: Arc<PendingResultManager>,
}

impl DatabaseQueueManager {
    pub fn new(max_databases: usize) -> Self {
        Self::with_engines(Arc::new(EngineRegistry::with_builtin_engines()), max_databases)
    }

    pub fn with_engines(engines: Arc<EngineRegistry>, max_databases: usize) -> Self {
        Self {
            databases: Mutex::new(Vec::new()),
            max_databases: max_databases.max(1),
            default_query_timeout_seconds: crate::constants::DEFAULT_QUERY_TIMEOUT_SECONDS,
            stats: Arc::new(ManagerStats::new()),
            engines,
            pending: Arc::new(PendingResultManager::new()),
        }
    }

    /// Build a manager from configuration and register every configured
    /// database. A database entry that fails validation aborts startup.
    pub async fn from_config(
        config: &DqmConfig,
        engines: Arc<EngineRegistry>,
    ) -> Result<Arc<Self>> {
        config
            .validate()
            .map_err(|e| DqmError::configuration("manager", e.to_string()))?;

        let mut manager = Self::with_engines(engines, config.max_databases);
        manager.default_query_timeout_seconds = config.default_query_timeout_seconds;
        let manager = Arc::new(manager);

        for entry in &config.databases {
            manager.add_database(entry).await?;
        }
        Ok(manager)
    }

    pub fn stats(&self) -> &Arc<ManagerStats> {
        &self.stats
    }

    pub fn pending(&self) -> &Arc<PendingResultManager> {
        &self.pending
    }

    pub fn database_count(&self) -> usize {
        self.databases.lock().len()
    }

    /// Register a database: validate its configuration, resolve the engine
    /// (fail fast on unknown names - no queue is created), build the
    /// connection string, create the Lead queue, and start its worker.
    pub async fn add_database(&self, entry: &DatabaseEntry) -> Result<Arc<DatabaseQueue>> {
        info!(database = %entry.name, "Starting database");

        entry
            .validate()
            .map_err(|e| DqmError::configuration("database", e.to_string()))?;
        let engine = self.engines.get_by_name(&entry.engine)?;

        let connection_string = match &entry.connection_string {
            Some(explicit) => explicit.clone(),
            None => engine.build_connection_string(&ConnectionConfig {
                host: entry.host.clone(),
                port: entry.port,
                database: entry.database.clone(),
                username: entry.user.clone(),
                password: entry.password.clone(),
                connection_string: None,
                timeout_seconds: 30,
            }),
        };

        {
            let databases = self.databases.lock();
            if databases.iter().any(|d| d.database_name() == entry.name) {
                return Err(DqmError::DatabaseAlreadyRegistered {
                    database: entry.name.clone(),
                });
            }
            if databases.len() >= self.max_databases {
                return Err(DqmError::RegistryFull {
                    capacity: self.max_databases,
                });
            }
        }

        let lead = DatabaseQueue::create_lead(
            entry,
            &connection_string,
            self.engines.clone(),
            self.pending.clone(),
            self.stats.clone(),
        )?;
        lead.start_worker()?;

        {
            let mut databases = self.databases.lock();
            // Re-check under the lock; a racing add may have won
            if databases.iter().any(|d| d.database_name() == entry.name) {
                drop(databases);
                lead.shutdown().await;
                return Err(DqmError::DatabaseAlreadyRegistered {
                    database: entry.name.clone(),
                });
            }
            if databases.len() >= self.max_databases {
                drop(databases);
                lead.shutdown().await;
                return Err(DqmError::RegistryFull {
                    capacity: self.max_databases,
                });
            }
            databases.push(lead.clone());
        }

        info!(database = %entry.name, "DQM launched successfully");
        Ok(lead)
    }

    /// Look up a database's Lead queue by name.
    pub fn get_database(&self, name: &str) -> Option<Arc<DatabaseQueue>> {
        self.databases
            .lock()
            .iter()
            .find(|d| d.database_name() == name)
            .cloned()
    }

    /// Deregister and tear down a database's queue hierarchy.
    pub async fn remove_database(&self, name: &str) -> Result<()> {
        let lead = {
            let mut databases = self.databases.lock();
            let index = databases.iter().position(|d| d.database_name() == name);
            index.map(|i| databases.remove(i))
        };
        match lead {
            Some(lead) => {
                lead.shutdown().await;
                Ok(())
            }
            None => Err(DqmError::DatabaseNotFound {
                database: name.to_string(),
            }),
        }
    }

    /// Select the best queue for a hint: smallest depth among matching
    /// queues, ties broken by the earliest last-request time, Lead fallback
    /// when nothing matches.
    pub fn select_optimal_queue(
        &self,
        database_name: &str,
        queue_type_hint: i32,
    ) -> Result<Arc<DatabaseQueue>> {
        let lead = self
            .get_database(database_name)
            .ok_or_else(|| DqmError::DatabaseNotFound {
                database: database_name.to_string(),
            })?;

        let kind = QueueKind::from_hint(queue_type_hint);
        let mut candidates: Vec<Arc<DatabaseQueue>> = lead
            .children_snapshot()
            .into_iter()
            .filter(|c| c.queue_kind() == kind)
            .collect();
        if lead.queue_kind() == kind {
            candidates.push(lead.clone());
        }

        let best = candidates.into_iter().min_by_key(|queue| {
            (queue.own_depth(), queue.last_request_time_millis())
        });

        Ok(best.unwrap_or(lead))
    }

    /// Fire-and-forget submission to the named database's Lead queue, which
    /// routes to a matching child when one exists.
    pub fn submit_query(&self, database_name: &str, query: &DatabaseQuery) -> Result<()> {
        let lead = self
            .get_database(database_name)
            .ok_or_else(|| DqmError::DatabaseNotFound {
                database: database_name.to_string(),
            })?;
        lead.submit_query(query)
    }

    /// Synchronous request/response: register the pending result before
    /// submitting so the worker's completion signal can never be missed,
    /// then block for the result or the timeout.
    pub async fn submit_and_await(
        &self,
        database_name: &str,
        query: &DatabaseQuery,
        timeout_seconds: Option<u64>,
    ) -> Result<WaitOutcome> {
        let query_id = query
            .query_id
            .clone()
            .ok_or_else(|| DqmError::internal("submit_and_await requires a query id"))?;
        let timeout = timeout_seconds.unwrap_or(self.default_query_timeout_seconds);

        let ticket = self.pending.register(&query_id, timeout)?;
        if let Err(e) = self.submit_query(database_name, query) {
            self.pending.cancel(&query_id);
            error!(query_id = %query_id, error = %e, "Submission failed - cancelled pending result");
            return Err(e);
        }

        let outcome = self.pending.wait(ticket).await;
        if matches!(outcome, WaitOutcome::TimedOut) {
            self.stats.record_timeout();
        }
        Ok(outcome)
    }

    /// Observable status of a previously submitted query.
    pub fn query_status(&self, query_id: &str) -> QueryStatus {
        match self.pending.status(query_id) {
            Some(PendingStatus::Pending) => QueryStatus::Pending,
            Some(PendingStatus::Ready) => QueryStatus::ResultReady,
            Some(PendingStatus::Cancelled) => QueryStatus::Cancelled,
            None => QueryStatus::Unknown,
        }
    }

    /// Cancel a query's pending registration. An already-executing statement
    /// is not interrupted; its eventual result is dropped.
    pub fn cancel_query(&self, query_id: &str) -> bool {
        self.pending.cancel(query_id)
    }

    /// Age of an in-flight query's registration in milliseconds, or None
    /// when the id is unknown.
    pub fn query_age_ms(&self, query_id: &str) -> Option<i64> {
        self.pending.age_ms(query_id)
    }

    /// Manager statistics as JSON.
    pub fn stats_json(&self) -> serde_json::Value {
        self.stats.to_json()
    }

    /// Tear down every registered database, in parallel.
    pub async fn shutdown_all(&self) {
        let databases: Vec<Arc<DatabaseQueue>> = {
            let mut guard = self.databases.lock();
            guard.drain(..).collect()
        };
        futures::future::join_all(databases.iter().map(|lead| lead.shutdown())).await;
        info!("Database queue manager shut down");
    }
}

impl Default for DatabaseQueueManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DATABASES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;

    fn manager_with_idle_lead() -> (DatabaseQueueManager, Arc<DatabaseQueue>) {
        let registry = EngineRegistry::empty();
        registry.register(Arc::new(MockEngine::new(crate::engine::EngineKind::Sqlite)));
        let manager = DatabaseQueueManager::with_engines(Arc::new(registry), 4);

        let mut entry = DatabaseEntry::new("orders", "sqlite");
        entry.database = Some("orders.fake".to_string());
        let lead = DatabaseQueue::create_lead(
            &entry,
            "orders.fake",
            manager.engines.clone(),
            manager.pending.clone(),
            manager.stats.clone(),
        )
        .unwrap();
        manager.databases.lock().push(lead.clone());
        (manager, lead)
    }

    fn attach_idle_worker(
        lead: &Arc<DatabaseQueue>,
        kind: QueueKind,
        number: i32,
    ) -> Arc<DatabaseQueue> {
        // Workers are attached without starting their tasks so queue depths
        // stay exactly where the test puts them
        let worker = DatabaseQueue::create_worker(lead, kind).unwrap();
        worker.set_queue_number(number);
        lead.lead_state().unwrap().children.lock().push(worker.clone());
        worker
    }

    #[tokio::test]
    async fn selection_prefers_minimum_depth() {
        let (manager, lead) = manager_with_idle_lead();
        let busy = attach_idle_worker(&lead, QueueKind::Fast, 1);
        let idle = attach_idle_worker(&lead, QueueKind::Fast, 2);

        let query = DatabaseQuery::new("SELECT 1", QueueKind::Fast.hint());
        busy.submit_query(&query).unwrap();
        busy.submit_query(&query).unwrap();
        idle.submit_query(&query).unwrap();

        let selected = manager
            .select_optimal_queue("orders", QueueKind::Fast.hint())
            .unwrap();
        assert!(Arc::ptr_eq(&selected, &idle));
    }

    #[tokio::test]
    async fn selection_breaks_depth_ties_by_earliest_request() {
        let (manager, lead) = manager_with_idle_lead();
        let first = attach_idle_worker(&lead, QueueKind::Medium, 1);
        let second = attach_idle_worker(&lead, QueueKind::Medium, 2);

        let query = DatabaseQuery::new("SELECT 1", QueueKind::Medium.hint());
        first.submit_query(&query).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        second.submit_query(&query).unwrap();

        // Equal depths; the earlier last-request time wins
        let selected = manager
            .select_optimal_queue("orders", QueueKind::Medium.hint())
            .unwrap();
        assert!(Arc::ptr_eq(&selected, &first));
    }

    #[tokio::test]
    async fn selection_falls_back_to_lead_when_no_child_matches() {
        let (manager, lead) = manager_with_idle_lead();
        attach_idle_worker(&lead, QueueKind::Fast, 1);

        let selected = manager
            .select_optimal_queue("orders", QueueKind::Cache.hint())
            .unwrap();
        assert!(Arc::ptr_eq(&selected, &lead));
    }

    #[test]
    fn stats_moving_average() {
        let stats = ManagerStats::new();
        stats.record_completion(QueueKind::Fast, 10);
        stats.record_completion(QueueKind::Fast, 20);
        let json = stats.to_json();
        let fast = &json["per_queue_stats"][2];
        assert_eq!(fast["queue_type"], "fast");
        assert_eq!(fast["completed"], 2);
        assert_eq!(fast["avg_execution_time_ms"], 15);
    }

    #[test]
    fn stats_json_totals() {
        let stats = ManagerStats::new();
        stats.record_submission(QueueKind::Medium);
        stats.record_failure(QueueKind::Medium);
        stats.record_timeout();
        let json = stats.to_json();
        assert_eq!(json["total_queries_submitted"], 1);
        assert_eq!(json["total_queries_failed"], 1);
        assert_eq!(json["total_timeouts"], 1);
    }
}
