//! # Configuration System
//!
//! YAML-based configuration for the queue subsystem. A configuration file
//! declares the managed databases - engine, connection parameters, bootstrap
//! query, migration flags, and per-queue-type worker start counts - plus
//! manager-wide limits. Loading validates eagerly: a database entry that
//! cannot work fails at load time, not at first use.
//!
//! ## Example
//!
//! ```yaml
//! max_databases: 10
//! default_query_timeout_seconds: 30
//! databases:
//!   - name: orders
//!     engine: postgresql
//!     host: db.internal
//!     port: 5432
//!     database: orders
//!     user: app
//!     password: secret
//!     bootstrap_query: "SELECT query_ref, query_type, sql_template FROM queries"
//!     auto_migration: true
//!     test_migration: false
//!     migrations: ./migrations/orders
//!     queues:
//!       fast: { start: 2 }
//!       medium: { start: 1 }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_MAX_CHILD_QUEUES, DEFAULT_MAX_DATABASES, DEFAULT_QUERY_TIMEOUT_SECONDS,
};
use crate::engine::EngineKind;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

fn default_max_databases() -> usize {
    DEFAULT_MAX_DATABASES
}

fn default_query_timeout() -> u64 {
    DEFAULT_QUERY_TIMEOUT_SECONDS
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_max_child_queues() -> usize {
    DEFAULT_MAX_CHILD_QUEUES
}

fn default_prepared_statement_cache_size() -> usize {
    32
}

/// Root configuration for the queue subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DqmConfig {
    /// Capacity of the manager's Lead-queue registry.
    #[serde(default = "default_max_databases")]
    pub max_databases: usize,

    /// Timeout applied to synchronous result waits without an explicit one.
    #[serde(default = "default_query_timeout")]
    pub default_query_timeout_seconds: u64,

    /// Managed databases, one Lead queue each.
    #[serde(default)]
    pub databases: Vec<DatabaseEntry>,
}

impl Default for DqmConfig {
    fn default() -> Self {
        Self {
            max_databases: DEFAULT_MAX_DATABASES,
            default_query_timeout_seconds: DEFAULT_QUERY_TIMEOUT_SECONDS,
            databases: Vec::new(),
        }
    }
}

impl DqmConfig {
    /// Validate the whole configuration, failing on the first problem.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_databases == 0 {
            return Err(ConfigurationError::invalid_value(
                "max_databases",
                "0",
                "must be at least 1",
            ));
        }
        if self.databases.len() > self.max_databases {
            return Err(ConfigurationError::invalid_value(
                "databases",
                self.databases.len().to_string(),
                format!("exceeds max_databases ({})", self.max_databases),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for entry in &self.databases {
            entry.validate()?;
            if !seen.insert(entry.name.as_str()) {
                return Err(ConfigurationError::invalid_value(
                    "databases.name",
                    entry.name.clone(),
                    "duplicate database name",
                ));
            }
        }
        Ok(())
    }

    pub fn database(&self, name: &str) -> Option<&DatabaseEntry> {
        self.databases.iter().find(|d| d.name == name)
    }
}

/// Per-database connection entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseEntry {
    /// Logical database name; Lead queues register under this.
    pub name: String,

    /// Engine name: postgresql/postgres, mysql, sqlite, db2.
    pub engine: String,

    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,

    /// Fully assembled connection string; overrides the discrete fields.
    pub connection_string: Option<String>,

    /// Query re-run periodically to refresh the QTC and migration watermarks.
    pub bootstrap_query: Option<String>,

    #[serde(default)]
    pub auto_migration: bool,

    #[serde(default)]
    pub test_migration: bool,

    /// Migration source directory; files match `<basename>_<NNNNN>.sql`.
    pub migrations: Option<String>,

    pub schema: Option<String>,

    #[serde(default = "default_prepared_statement_cache_size")]
    pub prepared_statement_cache_size: usize,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,

    #[serde(default = "default_max_child_queues")]
    pub max_child_queues: usize,

    /// Initial worker counts per queue type.
    #[serde(default)]
    pub queues: WorkerQueueConfig,
}

impl DatabaseEntry {
    /// Minimal entry for a named database on an engine; everything else at
    /// defaults. Used heavily by tests.
    pub fn new(name: impl Into<String>, engine: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            engine: engine.into(),
            host: None,
            port: None,
            database: None,
            user: None,
            password: None,
            connection_string: None,
            bootstrap_query: None,
            auto_migration: false,
            test_migration: false,
            migrations: None,
            schema: None,
            prepared_statement_cache_size: default_prepared_statement_cache_size(),
            heartbeat_interval_seconds: default_heartbeat_interval(),
            max_child_queues: default_max_child_queues(),
            queues: WorkerQueueConfig::default(),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.is_empty() {
            return Err(ConfigurationError::missing_field("databases.name"));
        }
        if EngineKind::from_name(&self.engine).is_none() {
            return Err(ConfigurationError::invalid_value(
                "databases.engine",
                self.engine.clone(),
                "unknown engine name",
            ));
        }
        if self.connection_string.is_none() && self.database.is_none() {
            return Err(ConfigurationError::missing_field(
                "databases.connection_string or databases.database",
            ));
        }
        let total_workers = self.queues.total_start_count();
        if total_workers > self.max_child_queues {
            return Err(ConfigurationError::invalid_value(
                "databases.queues",
                total_workers.to_string(),
                format!("exceeds max_child_queues ({})", self.max_child_queues),
            ));
        }
        if self.heartbeat_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "databases.heartbeat_interval_seconds",
                "0",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Initial worker counts per queue type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerQueueConfig {
    #[serde(default)]
    pub slow: QueueStartConfig,
    #[serde(default)]
    pub medium: QueueStartConfig,
    #[serde(default)]
    pub fast: QueueStartConfig,
    #[serde(default)]
    pub cache: QueueStartConfig,
}

impl WorkerQueueConfig {
    pub fn start_count(&self, kind: crate::constants::QueueKind) -> usize {
        use crate::constants::QueueKind;
        match kind {
            QueueKind::Slow => self.slow.start,
            QueueKind::Medium => self.medium.start,
            QueueKind::Fast => self.fast.start,
            QueueKind::Cache => self.cache.start,
            QueueKind::Lead => 0,
        }
    }

    pub fn total_start_count(&self) -> usize {
        self.slow.start + self.medium.start + self.fast.start + self.cache.start
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStartConfig {
    /// Number of workers of this type spawned by the Lead conductor.
    #[serde(default)]
    pub start: usize,
}
