//! # Migration Engine
//!
//! Schema migrations run through the normal query pipeline against the
//! Lead queue's persistent connection. Three monotonically-increasing
//! watermarks track state:
//!
//! - `available` - highest migration script discovered in the source
//! - `loaded`    - highest migration recorded in the QTC with type 1000
//! - `applied`   - highest migration marked applied (type 1003)
//!
//! The LOAD phase populates the queries table from the migration source;
//! the APPLY phase executes loaded-but-unapplied migrations one at a time,
//! re-running the bootstrap query between each to refresh state; the
//! reverse/TEST phase undoes applied migrations for pre-production testing.
//! Both iterative phases detect stalls - a migration that "succeeds" without
//! moving the applied watermark aborts the phase instead of looping forever.

pub mod apply;
pub mod reverse;
pub mod source;
pub mod splitter;

use std::sync::atomic::{AtomicI64, Ordering};

use tracing::{debug, error, info};

use crate::bootstrap;
use crate::cache::QueryCache;
use crate::config::DatabaseEntry;
use crate::constants::MAX_MIGRATION_CYCLES;
use crate::engine::{EngineConnection, IsolationLevel, QueryRequest};
use crate::error::{DqmError, Result};

pub use source::{FilesystemMigrationSource, MigrationScript, MigrationSource, NullMigrationSource};
pub use splitter::split_sql_statements;

/// What the migration engine should do next, as a pure function of the
/// watermarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationAction {
    None,
    Load,
    Apply,
}

/// Determine the next migration action.
///
/// Migration identifiers start at 1000, so a watermark below 1000 means
/// "nothing at this stage yet".
pub fn determine_action(available: i64, loaded: i64) -> MigrationAction {
    if available < 1000 {
        return MigrationAction::None;
    }
    // First-time population, or newer scripts discovered than are loaded
    if loaded < 1000 || loaded < available {
        return MigrationAction::Load;
    }
    // Everything discovered is loaded; loaded-but-unapplied work may exist
    MigrationAction::Apply
}

/// The three migration watermarks, shared across the Lead's worker and
/// refreshed by every bootstrap run.
#[derive(Debug, Default)]
pub struct Watermarks {
    available: AtomicI64,
    loaded: AtomicI64,
    applied: AtomicI64,
}

impl Watermarks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn available(&self) -> i64 {
        self.available.load(Ordering::SeqCst)
    }

    pub fn loaded(&self) -> i64 {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn applied(&self) -> i64 {
        self.applied.load(Ordering::SeqCst)
    }

    pub fn set_available(&self, value: i64) {
        self.available.store(value, Ordering::SeqCst);
    }

    pub fn set_loaded(&self, value: i64) {
        self.loaded.store(value, Ordering::SeqCst);
    }

    pub fn set_applied(&self, value: i64) {
        self.applied.store(value, Ordering::SeqCst);
    }
}

/// Deterministic prepared-statement name for a pipeline statement.
pub fn statement_hash(prefix: &str, sql: &str, hex_len: usize) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    sql.hash(&mut hasher);
    let digest = format!("{:016x}", hasher.finish());
    format!("{}_{}", prefix, &digest[..hex_len.min(digest.len())])
}

/// Execute one migration's SQL through the pipeline: split into statements,
/// run all of them inside a single transaction, commit on all-success or
/// roll back on any failure.
///
/// The caller holds the connection for the duration; the migration's own SQL
/// is expected to advance the applied watermark (type 1003) as part of its
/// content.
pub async fn execute_migration_sql(
    conn: &mut dyn EngineConnection,
    sql: &str,
    migration_id: i64,
    delimiter: &str,
    label: &str,
) -> Result<()> {
    let statements = split_sql_statements(sql, delimiter);
    if statements.is_empty() {
        return Err(DqmError::migration(
            label,
            format!("migration {migration_id} contains no statements"),
        ));
    }

    conn.begin(IsolationLevel::ReadCommitted).await?;
    debug!(
        dqm = %label,
        migration_id,
        statements = statements.len(),
        "Started transaction for migration"
    );

    for (index, statement) in statements.iter().enumerate() {
        let hash = statement_hash("MPSC", statement, 16);
        let mut request = QueryRequest::new("migration_statement", statement.clone());
        request.use_prepared_statement = true;
        request.prepared_statement_name = Some(hash.clone());

        let outcome = conn.execute(&request).await;
        match outcome {
            Ok(result) if result.success => {
                debug!(
                    dqm = %label,
                    statement = index + 1,
                    hash = %hash,
                    affected = result.affected_rows,
                    "Statement executed"
                );
            }
            Ok(result) => {
                error!(
                    dqm = %label,
                    statement = index + 1,
                    hash = %hash,
                    error = result.error_message.as_deref().unwrap_or("unknown"),
                    "Statement failed"
                );
                rollback_quietly(conn, migration_id, label).await;
                return Err(DqmError::migration(
                    label,
                    format!("statement {} of migration {migration_id} failed", index + 1),
                ));
            }
            Err(e) => {
                error!(
                    dqm = %label,
                    statement = index + 1,
                    hash = %hash,
                    error = %e,
                    "Statement failed"
                );
                rollback_quietly(conn, migration_id, label).await;
                return Err(e);
            }
        }
    }

    conn.commit().await.map_err(|e| {
        error!(dqm = %label, migration_id, error = %e, "Failed to commit migration");
        e
    })?;
    debug!(dqm = %label, migration_id, "Migration committed");
    Ok(())
}

async fn rollback_quietly(conn: &mut dyn EngineConnection, migration_id: i64, label: &str) {
    if let Err(e) = conn.rollback().await {
        error!(dqm = %label, migration_id, error = %e, "Failed to roll back migration");
    } else {
        debug!(dqm = %label, migration_id, "Migration rolled back");
    }
}

fn log_migration_status(label: &str, status: &str, watermarks: &Watermarks) {
    info!(
        dqm = %label,
        available = watermarks.available(),
        loaded = watermarks.loaded(),
        applied = watermarks.applied(),
        "Migration {status}"
    );
}

/// Run the full migration sequence for a Lead queue: discover available
/// scripts, then cycle LOAD/APPLY until the watermarks are current, bounding
/// total cycles so oscillating state cannot loop forever.
///
/// The caller holds the connection lock for the whole run; migrations never
/// execute concurrently with a second migration pass.
pub async fn run_migration_cycles(
    conn: &mut dyn EngineConnection,
    source: &dyn MigrationSource,
    entry: &DatabaseEntry,
    cache: &QueryCache,
    watermarks: &Watermarks,
    label: &str,
) -> Result<()> {
    if !source.validate(label) {
        // Expected on an empty database with no scripts staged; the
        // conductor proceeds so the application stays queryable.
        info!(dqm = %label, "Migration validation found no scripts - continuing without migrations");
        return Ok(());
    }

    watermarks.set_available(source.latest_available());

    let bootstrap_sql = entry.bootstrap_query.as_deref().unwrap_or_default();
    let mut cycles = 0u32;

    loop {
        if cycles >= MAX_MIGRATION_CYCLES {
            error!(
                dqm = %label,
                max_cycles = MAX_MIGRATION_CYCLES,
                "Migration exceeded maximum cycles, stopping"
            );
            return Err(DqmError::migration(
                &entry.name,
                format!("exceeded maximum migration cycles ({MAX_MIGRATION_CYCLES})"),
            ));
        }
        cycles += 1;

        match determine_action(watermarks.available(), watermarks.loaded()) {
            MigrationAction::None => {
                log_migration_status(label, "current", watermarks);
                return Ok(());
            }
            MigrationAction::Load => {
                log_migration_status(label, "loading", watermarks);
                let loaded = source.load(conn, label).await?;
                debug!(dqm = %label, scripts = loaded, "Migration load phase complete");
                bootstrap::refresh_with_connection(conn, bootstrap_sql, cache, watermarks, label)
                    .await?;
            }
            MigrationAction::Apply => {
                log_migration_status(label, "updating", watermarks);
                let applied =
                    apply::run_apply_phase(conn, bootstrap_sql, cache, watermarks, &entry.name, label)
                        .await?;
                if applied == 0 {
                    log_migration_status(label, "current", watermarks);
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_table() {
        assert_eq!(determine_action(0, 0), MigrationAction::None);
        assert_eq!(determine_action(999, 0), MigrationAction::None);
        assert_eq!(determine_action(1000, 0), MigrationAction::Load);
        assert_eq!(determine_action(1005, 1000), MigrationAction::Load);
        assert_eq!(determine_action(1000, 1000), MigrationAction::Apply);
        assert_eq!(determine_action(1003, 1003), MigrationAction::Apply);
    }

    #[test]
    fn watermarks_default_to_zero() {
        let w = Watermarks::new();
        assert_eq!(w.available(), 0);
        assert_eq!(w.loaded(), 0);
        assert_eq!(w.applied(), 0);

        w.set_available(1002);
        w.set_loaded(1001);
        w.set_applied(1000);
        assert_eq!((w.available(), w.loaded(), w.applied()), (1002, 1001, 1000));
    }

    #[tokio::test]
    async fn oscillating_state_is_bounded_by_the_cycle_cap() {
        use crate::engine::{ConnectionConfig, DatabaseEngine, EngineKind, MockEngine};

        // A source that always reports work but whose load never moves the
        // loaded watermark: LOAD repeats until the cycle cap trips
        struct StuckSource;

        #[async_trait::async_trait]
        impl MigrationSource for StuckSource {
            fn describe(&self) -> String {
                "stuck".to_string()
            }
            fn validate(&self, _label: &str) -> bool {
                true
            }
            fn latest_available(&self) -> i64 {
                1000
            }
            async fn load(
                &self,
                _conn: &mut dyn crate::engine::EngineConnection,
                _label: &str,
            ) -> crate::error::Result<usize> {
                Ok(0)
            }
        }

        let engine = MockEngine::new(EngineKind::Sqlite);
        let mut conn = engine.connect(&ConnectionConfig::default()).await.unwrap();
        let cache = crate::cache::QueryCache::new();
        let watermarks = Watermarks::new();
        let mut entry = crate::config::DatabaseEntry::new("orders", "sqlite");
        entry.database = Some(":memory:".to_string());

        let err = run_migration_cycles(
            &mut *conn,
            &StuckSource,
            &entry,
            &cache,
            &watermarks,
            "DQM-orders-00-SMFC",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DqmError::Migration { .. }));
        assert!(err.to_string().contains("maximum migration cycles"));
    }

    #[test]
    fn statement_hash_is_deterministic_and_bounded() {
        let a = statement_hash("MPSC", "SELECT 1", 16);
        let b = statement_hash("MPSC", "SELECT 1", 16);
        let c = statement_hash("MPSC", "SELECT 2", 16);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("MPSC_"));
        assert_eq!(a.len(), "MPSC_".len() + 16);
    }
}
