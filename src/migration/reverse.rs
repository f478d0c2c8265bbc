//! # Migration Reverse/TEST Phase
//!
//! Mirror of the APPLY phase for pre-production testing: while migrations
//! are applied, find the reverse script (type 1001) for the currently
//! applied migration, execute it transactionally, and verify the applied
//! watermark actually decremented. Stops on stall, exhaustion, or failure.
//! Gated independently by the `test_migration` configuration flag.

use tracing::{debug, error};

use crate::bootstrap;
use crate::cache::QueryCache;
use crate::constants::{query_types, SUBQUERY_DELIMITER};
use crate::engine::EngineConnection;
use crate::error::{DqmError, Result};
use crate::migration::{execute_migration_sql, Watermarks};

/// Find the reverse script for the currently applied migration:
/// `(applied, type=1001)` in the QTC. Returns 0 when none exists.
pub fn find_next_reverse_migration(cache: &QueryCache, watermarks: &Watermarks) -> i64 {
    let current = watermarks.applied();
    if current <= 0 {
        return 0;
    }
    if cache
        .lookup(current, query_types::MIGRATION_REVERSE)
        .is_some()
    {
        current
    } else {
        0
    }
}

/// Run the reverse/TEST phase. Returns the number of migrations reversed.
pub async fn run_reverse_phase(
    conn: &mut dyn EngineConnection,
    bootstrap_sql: &str,
    cache: &QueryCache,
    watermarks: &Watermarks,
    database: &str,
    label: &str,
) -> Result<u32> {
    debug!(dqm = %label, "Starting migration reverse phase");

    let mut reversed_count = 0u32;
    let mut previous_apply = watermarks.applied();

    while watermarks.applied() > 0 {
        let migration_id = find_next_reverse_migration(cache, watermarks);
        if migration_id == 0 {
            debug!(
                dqm = %label,
                applied = watermarks.applied(),
                "No reverse migration found - reverse phase complete"
            );
            break;
        }

        let sql = cache
            .lookup(migration_id, query_types::MIGRATION_REVERSE)
            .ok_or_else(|| {
                DqmError::migration(
                    database,
                    format!("reverse migration {migration_id} vanished from query cache"),
                )
            })?;

        debug!(dqm = %label, migration_id, "Applying reverse migration");
        execute_migration_sql(conn, &sql, migration_id, SUBQUERY_DELIMITER, label).await?;
        reversed_count += 1;

        bootstrap::refresh_with_connection(conn, bootstrap_sql, cache, watermarks, label).await?;

        if watermarks.applied() == previous_apply {
            error!(
                dqm = %label,
                migration_id,
                applied = previous_apply,
                "Reverse migration applied but watermark unchanged - stopping to prevent infinite loop"
            );
            return Err(DqmError::MigrationStall {
                database: database.to_string(),
                watermark: previous_apply,
            });
        }
        previous_apply = watermarks.applied();
    }

    debug!(dqm = %label, reversed_count, "Migration reverse phase completed");
    Ok(reversed_count)
}
