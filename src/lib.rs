#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # DQM Core
//!
//! Multi-queue database access layer: per-database connection lifecycles,
//! priority-tiered worker queues, and schema migrations executed through the
//! normal query pipeline.
//!
//! ## Architecture
//!
//! Each managed database gets one **Lead queue**. At startup its worker runs
//! the conductor sequence exactly once: establish the persistent connection,
//! bootstrap the Query Table Cache, run migrations (forward, and optionally
//! the reverse test pass), then spawn the configured worker queues - slow,
//! medium, fast, and cache tiers. Every queue, Lead included, is the same
//! structure: one worker task, one priority FIFO, one exclusively owned
//! connection, and a heartbeat that reconnects on failure.
//!
//! Callers submit work through the [`manager::DatabaseQueueManager`], which
//! routes by database name and queue-type hint. The submission pipeline is
//! fire-and-forget; the [`pending::PendingResultManager`] bridges it into a
//! synchronous request/response API for callers that need the result.
//!
//! ## Module Organization
//!
//! - [`manager`] - Lead-queue registry, selection, statistics
//! - [`queue`] - the DatabaseQueue core, worker loop, heartbeat, conductor
//! - [`migration`] - watermark tracking, LOAD/APPLY/reverse phases
//! - [`engine`] - SQL engine capability traits and implementations
//! - [`pending`] - synchronous result correlation
//! - [`cache`] - the Query Table Cache (QTC)
//! - [`fifo`] - the concurrent FIFO capability
//! - [`config`] - YAML configuration model and loader
//! - [`error`] - structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dqm_core::config::DatabaseEntry;
//! use dqm_core::manager::DatabaseQueueManager;
//! use dqm_core::query::DatabaseQuery;
//!
//! # async fn example() -> dqm_core::Result<()> {
//! let manager = DatabaseQueueManager::new(10);
//!
//! let mut entry = DatabaseEntry::new("orders", "sqlite");
//! entry.database = Some("./orders.db".to_string());
//! entry.queues.fast.start = 2;
//! manager.add_database(&entry).await?;
//!
//! let query = DatabaseQuery::new("SELECT COUNT(*) AS n FROM orders", 2);
//! let outcome = manager.submit_and_await("orders", &query, Some(10)).await?;
//! println!("outcome: {outcome:?}");
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod fifo;
pub mod logging;
pub mod manager;
pub mod migration;
pub mod pending;
pub mod query;
pub mod queue;

pub use cache::{QueryCache, QueryCacheEntry};
pub use config::{ConfigManager, DatabaseEntry, DqmConfig};
pub use constants::QueueKind;
pub use engine::{
    DatabaseEngine, EngineConnection, EngineKind, EngineRegistry, QueryRequest, QueryResult,
};
pub use error::{DqmError, Result};
pub use manager::{DatabaseQueueManager, ManagerStats, QueryStatus};
pub use migration::{MigrationAction, MigrationSource, Watermarks};
pub use pending::{PendingResultManager, PendingStatus, WaitOutcome};
pub use query::DatabaseQuery;
pub use queue::DatabaseQueue;
