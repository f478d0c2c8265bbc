//! # Error Types
//!
//! Structured error handling for the queue subsystem using thiserror
//! instead of `Box<dyn Error>` patterns. Queue-level operations report
//! failures through these variants with out-of-band tracing logs; worker
//! tasks never let an error cross the task boundary as a panic.

use thiserror::Error;

/// Errors surfaced by the database queue subsystem.
#[derive(Error, Debug)]
pub enum DqmError {
    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Unknown database engine: {engine}")]
    UnknownEngine { engine: String },

    #[error("Database connection error: {database}: {message}")]
    Connection { database: String, message: String },

    #[error("Query execution error: {operation}: {message}")]
    QueryExecution { operation: String, message: String },

    #[error("Queue operation failed: {queue}: {operation}: {message}")]
    QueueOperation {
        queue: String,
        operation: String,
        message: String,
    },

    #[error("Database not registered: {database}")]
    DatabaseNotFound { database: String },

    #[error("Database already registered: {database}")]
    DatabaseAlreadyRegistered { database: String },

    #[error("Queue registry full: capacity {capacity}")]
    RegistryFull { capacity: usize },

    #[error("Child queue limit reached: {database} has {count} of {max}")]
    ChildQueueLimit {
        database: String,
        count: usize,
        max: usize,
    },

    #[error("Migration error: {database}: {message}")]
    Migration { database: String, message: String },

    #[error("Migration stalled: {database}: applied watermark unchanged at {watermark}")]
    MigrationStall { database: String, watermark: i64 },

    #[error("Envelope serialization error: {message}")]
    EnvelopeSerialization { message: String },

    #[error("Envelope deserialization error: {message}")]
    EnvelopeDeserialization { message: String },

    #[error("Pending result already registered for query: {query_id}")]
    DuplicatePendingResult { query_id: String },

    #[error("Timed out after {timeout_seconds}s: {operation}")]
    Timeout {
        operation: String,
        timeout_seconds: u64,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DqmError {
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn connection(database: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            database: database.into(),
            message: message.into(),
        }
    }

    pub fn query_execution(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QueryExecution {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn queue_operation(
        queue: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue: queue.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn migration(database: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Migration {
            database: database.into(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_seconds,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for DqmError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DqmError::query_execution("query", "No rows found"),
            sqlx::Error::Database(db_err) => {
                DqmError::query_execution("database", db_err.to_string())
            }
            sqlx::Error::Configuration(config_err) => {
                DqmError::configuration("database", config_err.to_string())
            }
            other => DqmError::connection("unknown", other.to_string()),
        }
    }
}

impl From<serde_json::Error> for DqmError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() || err.is_eof() {
            DqmError::EnvelopeDeserialization {
                message: err.to_string(),
            }
        } else {
            DqmError::EnvelopeSerialization {
                message: err.to_string(),
            }
        }
    }
}

/// Result type alias for queue subsystem operations.
pub type Result<T> = std::result::Result<T, DqmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = DqmError::connection("orders", "refused");
        assert!(matches!(err, DqmError::Connection { .. }));

        let err = DqmError::queue_operation("orders", "submit", "fifo rejected payload");
        assert!(matches!(err, DqmError::QueueOperation { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = DqmError::MigrationStall {
            database: "orders".to_string(),
            watermark: 1004,
        };
        let display = format!("{err}");
        assert!(display.contains("orders"));
        assert!(display.contains("1004"));
    }

    #[test]
    fn test_serde_json_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{broken").unwrap_err();
        let err: DqmError = json_err.into();
        assert!(matches!(err, DqmError::EnvelopeDeserialization { .. }));
    }
}
