//! Shared test helpers: a scripted fake queries table served through the
//! mock engine, plus entry/manager builders.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use dqm_core::config::DatabaseEntry;
use dqm_core::engine::{EngineKind, EngineRegistry, MockEngine, QueryResult};
use dqm_core::manager::DatabaseQueueManager;

/// In-memory stand-in for the queries table:
/// `(query_ref, query_type, sql_template)` rows.
#[derive(Default)]
pub struct FakeQueriesDb {
    rows: Mutex<Vec<(i64, i32, String)>>,
}

impl FakeQueriesDb {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, query_ref: i64, query_type: i32, sql_template: &str) {
        self.rows
            .lock()
            .push((query_ref, query_type, sql_template.to_string()));
    }

    pub fn remove(&self, query_ref: i64, query_type: i32) {
        self.rows
            .lock()
            .retain(|(r, t, _)| !(*r == query_ref && *t == query_type));
    }

    pub fn contains(&self, query_ref: i64, query_type: i32) -> bool {
        self.rows
            .lock()
            .iter()
            .any(|(r, t, _)| *r == query_ref && *t == query_type)
    }

    pub fn bootstrap_rows(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .lock()
            .iter()
            .map(|(query_ref, query_type, sql_template)| {
                let mut map = serde_json::Map::new();
                map.insert("query_ref".to_string(), json!(query_ref));
                map.insert("query_type".to_string(), json!(query_type));
                map.insert("sql_template".to_string(), json!(sql_template));
                map
            })
            .collect()
    }
}

/// Mock engine speaking a tiny statement dialect over the fake queries
/// table. Statements executed through the queue pipeline:
///
/// - `SELECT ...`              -> returns the current table as bootstrap rows
/// - `LOAD_MIGRATION <ref>`    -> records forward + reverse templates
/// - `SEED_APPLIED <ref>`      -> records an applied marker (type 1003)
/// - `APPLY_MIGRATION <ref>`   -> records the applied marker for `<ref>`
/// - `REVERSE_MIGRATION <ref>` -> removes the applied marker for `<ref>`
/// - `NOOP`                    -> succeeds without touching anything
pub fn fake_db_engine(db: Arc<FakeQueriesDb>) -> MockEngine {
    MockEngine::new(EngineKind::Sqlite).with_script(move |request| {
        let sql = request.sql_template.trim();
        let mut rows = Vec::new();
        let mut affected = 0u64;

        if sql.to_ascii_uppercase().starts_with("SELECT") {
            rows = db.bootstrap_rows();
        } else {
            let mut parts = sql.split_whitespace();
            let verb = parts.next().unwrap_or_default();
            let arg: i64 = parts.next().and_then(|a| a.parse().ok()).unwrap_or(0);
            match verb {
                "LOAD_MIGRATION" => {
                    db.insert(arg, 1000, &format!("APPLY_MIGRATION {arg}"));
                    db.insert(arg, 1001, &format!("REVERSE_MIGRATION {arg}"));
                    affected = 2;
                }
                "SEED_APPLIED" | "APPLY_MIGRATION" => {
                    db.insert(arg, 1003, "");
                    affected = 1;
                }
                "REVERSE_MIGRATION" => {
                    db.remove(arg, 1003);
                    affected = 1;
                }
                _ => {}
            }
        }

        let column_count = if rows.is_empty() { 0 } else { 3 };
        QueryResult {
            success: true,
            rows,
            column_count,
            affected_rows: affected,
            error_message: None,
            execution_time_ms: 1,
        }
    })
}

/// Registry whose sqlite slot is the given mock engine. Connection strings
/// without a URI scheme infer as sqlite, so plain names route to the mock.
pub fn mock_registry(engine: MockEngine) -> Arc<EngineRegistry> {
    let registry = EngineRegistry::empty();
    registry.register(Arc::new(engine));
    Arc::new(registry)
}

/// Database entry wired for the mock engine.
pub fn mock_entry(name: &str) -> DatabaseEntry {
    let mut entry = DatabaseEntry::new(name, "sqlite");
    entry.database = Some(format!("{name}.fake"));
    entry.bootstrap_query =
        Some("SELECT query_ref, query_type, sql_template FROM queries".to_string());
    entry
}

/// Manager over a mock-engine registry.
pub fn mock_manager(engine: MockEngine, max_databases: usize) -> DatabaseQueueManager {
    DatabaseQueueManager::with_engines(mock_registry(engine), max_databases)
}

/// Poll until `predicate` holds or the timeout elapses. Returns whether the
/// predicate held.
pub async fn wait_until(timeout: std::time::Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
