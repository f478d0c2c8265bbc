//! # Migration APPLY Phase
//!
//! Processes loaded-but-unapplied migrations through the normal query
//! pipeline. The bootstrap query is re-run between each migration to keep
//! the QTC and watermarks current, and the applied watermark is checked
//! after each migration - a migration that commits without moving the
//! watermark is a stall and aborts the phase rather than looping forever.

use tracing::{debug, error};

use crate::bootstrap;
use crate::cache::QueryCache;
use crate::constants::{query_types, SUBQUERY_DELIMITER};
use crate::engine::EngineConnection;
use crate::error::{DqmError, Result};
use crate::migration::{execute_migration_sql, Watermarks};

/// Find the next migration to apply: `(applied + 1, type=1000)` in the QTC.
/// Returns 0 when no further forward migration exists - that is APPLY-phase
/// completion, not an error.
pub fn find_next_migration_to_apply(cache: &QueryCache, watermarks: &Watermarks) -> i64 {
    let next = watermarks.applied() + 1;
    if cache.lookup(next, query_types::MIGRATION_FORWARD).is_some() {
        next
    } else {
        0
    }
}

/// Run the APPLY phase to completion. Returns the number of migrations
/// applied; zero means there was nothing to do.
pub async fn run_apply_phase(
    conn: &mut dyn EngineConnection,
    bootstrap_sql: &str,
    cache: &QueryCache,
    watermarks: &Watermarks,
    database: &str,
    label: &str,
) -> Result<u32> {
    debug!(dqm = %label, "Starting migration APPLY phase");

    let mut applied_count = 0u32;
    let mut previous_apply = watermarks.applied();

    loop {
        // Refresh migration state; the bootstrap always repopulates the QTC
        bootstrap::refresh_with_connection(conn, bootstrap_sql, cache, watermarks, label).await?;

        let next_migration = find_next_migration_to_apply(cache, watermarks);
        if next_migration == 0 {
            debug!(dqm = %label, applied_count, "No more migrations to apply - APPLY phase complete");
            break;
        }

        let sql = cache
            .lookup(next_migration, query_types::MIGRATION_FORWARD)
            .ok_or_else(|| {
                DqmError::migration(
                    database,
                    format!("migration {next_migration} vanished from query cache"),
                )
            })?;

        debug!(dqm = %label, migration_id = next_migration, "Applying migration");
        execute_migration_sql(conn, &sql, next_migration, SUBQUERY_DELIMITER, label).await?;
        applied_count += 1;

        // Re-check state after the migration ran
        bootstrap::refresh_with_connection(conn, bootstrap_sql, cache, watermarks, label).await?;

        if watermarks.applied() == previous_apply {
            error!(
                dqm = %label,
                migration_id = next_migration,
                applied = previous_apply,
                "Migration applied but watermark unchanged - stopping to prevent infinite loop"
            );
            return Err(DqmError::MigrationStall {
                database: database.to_string(),
                watermark: previous_apply,
            });
        }
        previous_apply = watermarks.applied();
    }

    debug!(dqm = %label, applied_count, "Migration APPLY phase completed");
    Ok(applied_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryCacheEntry;

    fn entry(query_ref: i64, query_type: i32, sql: &str) -> QueryCacheEntry {
        QueryCacheEntry {
            query_ref,
            query_type,
            sql_template: sql.to_string(),
            loaded_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn next_migration_is_applied_plus_one() {
        let cache = QueryCache::new();
        cache.replace_all(vec![
            entry(1000, query_types::MIGRATION_FORWARD, "f0"),
            entry(1001, query_types::MIGRATION_FORWARD, "f1"),
            entry(1000, query_types::MIGRATION_APPLIED, "m0"),
        ]);
        let watermarks = Watermarks::new();
        watermarks.set_applied(1000);

        assert_eq!(find_next_migration_to_apply(&cache, &watermarks), 1001);
    }

    #[test]
    fn exhaustion_reports_completion() {
        let cache = QueryCache::new();
        cache.replace_all(vec![entry(1000, query_types::MIGRATION_FORWARD, "f0")]);
        let watermarks = Watermarks::new();
        watermarks.set_applied(1000);

        assert_eq!(find_next_migration_to_apply(&cache, &watermarks), 0);
    }
}
