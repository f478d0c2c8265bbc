//! # Mock Engine
//!
//! Scripted in-memory engine for tests and bench mode. A mock engine is
//! registered under any [`EngineKind`] and answers every execute call
//! through a caller-provided script, recording the SQL it saw.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    ConnectionConfig, DatabaseEngine, EngineConnection, EngineKind, IsolationLevel, QueryRequest,
    QueryResult,
};
use crate::error::{DqmError, Result};

/// Script deciding the result of each executed request.
pub type MockScript = Arc<dyn Fn(&QueryRequest) -> QueryResult + Send + Sync>;

/// Shared observable state for a mock engine and its connections.
#[derive(Clone)]
pub struct MockEngine {
    kind: EngineKind,
    script: MockScript,
    healthy: Arc<AtomicBool>,
    refuse_connections: Arc<AtomicBool>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl MockEngine {
    pub fn new(kind: EngineKind) -> Self {
        Self {
            kind,
            script: Arc::new(|_| QueryResult {
                success: true,
                rows: Vec::new(),
                column_count: 0,
                affected_rows: 0,
                error_message: None,
                execution_time_ms: 0,
            }),
            healthy: Arc::new(AtomicBool::new(true)),
            refuse_connections: Arc::new(AtomicBool::new(false)),
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_script(
        mut self,
        script: impl Fn(&QueryRequest) -> QueryResult + Send + Sync + 'static,
    ) -> Self {
        self.script = Arc::new(script);
        self
    }

    /// All SQL templates executed through connections of this engine, in
    /// order, including transaction control statements.
    pub fn executed_sql(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl DatabaseEngine for MockEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn EngineConnection>> {
        if self.refuse_connections.load(Ordering::SeqCst) {
            return Err(DqmError::connection("mock", "connection refused by script"));
        }
        Ok(Box::new(MockConnection {
            kind: self.kind,
            script: self.script.clone(),
            healthy: self.healthy.clone(),
            executed: self.executed.clone(),
            live: true,
        }))
    }

    fn build_connection_string(&self, config: &ConnectionConfig) -> String {
        config
            .connection_string
            .clone()
            .or_else(|| config.database.clone())
            .unwrap_or_else(|| "mock".to_string())
    }

    fn validate_connection_string(&self, _connection_string: &str) -> bool {
        true
    }
}

struct MockConnection {
    kind: EngineKind,
    script: MockScript,
    healthy: Arc<AtomicBool>,
    executed: Arc<Mutex<Vec<String>>>,
    live: bool,
}

#[async_trait]
impl EngineConnection for MockConnection {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    async fn health_check(&mut self) -> bool {
        self.live && self.healthy.load(Ordering::SeqCst)
    }

    async fn execute(&mut self, request: &QueryRequest) -> Result<QueryResult> {
        if !self.live {
            return Err(DqmError::connection("mock", "connection already released"));
        }
        self.executed.lock().push(request.sql_template.clone());
        Ok((self.script)(request))
    }

    async fn begin(&mut self, isolation: IsolationLevel) -> Result<()> {
        self.executed
            .lock()
            .push(format!("BEGIN {}", isolation.as_sql()));
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.executed.lock().push("COMMIT".to_string());
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.executed.lock().push("ROLLBACK".to_string());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.live = false;
        Ok(())
    }
}
