//! # Bootstrap Query Execution
//!
//! The bootstrap query is a per-database configured query, re-run
//! periodically, that returns the contents of the queries table:
//! `(query_ref, query_type, sql_template)` rows. Executing it refreshes the
//! Query Table Cache and the loaded/applied migration watermarks, and
//! detects the empty-database case.

use tracing::{debug, error, warn};

use crate::cache::{QueryCache, QueryCacheEntry};
use crate::constants::query_types;
use crate::engine::{EngineConnection, QueryRequest};
use crate::error::Result;
use crate::migration::Watermarks;

/// Outcome of one bootstrap refresh.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapOutcome {
    pub row_count: usize,
    pub empty_database: bool,
}

/// Execute the bootstrap query on an already-held connection and refresh the
/// QTC plus the loaded/applied watermarks from its result set.
///
/// The `available` watermark is not touched here; it comes from migration
/// source discovery.
pub async fn refresh_with_connection(
    conn: &mut dyn EngineConnection,
    bootstrap_sql: &str,
    cache: &QueryCache,
    watermarks: &Watermarks,
    label: &str,
) -> Result<BootstrapOutcome> {
    // Fall back to a safe probe when no bootstrap query is configured
    let sql = if bootstrap_sql.trim().is_empty() {
        "SELECT 42 as test_value"
    } else {
        bootstrap_sql
    };

    let mut request = QueryRequest::new("bootstrap_query", sql);
    request.timeout_seconds = 1;

    let result = conn.execute(&request).await.map_err(|e| {
        error!(dqm = %label, error = %e, "Bootstrap query failed");
        e
    })?;

    debug!(
        dqm = %label,
        rows = result.rows.len(),
        columns = result.column_count,
        elapsed_ms = result.execution_time_ms,
        "Bootstrap query completed"
    );

    let mut entries = Vec::with_capacity(result.rows.len());
    let mut skipped = 0usize;
    for row in &result.rows {
        match decode_cache_row(row) {
            Some(entry) => entries.push(entry),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(
            dqm = %label,
            skipped,
            "Bootstrap rows missing query_ref/query_type/sql_template were skipped"
        );
    }

    let row_count = entries.len();
    let empty_database = row_count == 0;
    cache.replace_all(entries);

    watermarks.set_loaded(cache.highest_ref_of_type(query_types::MIGRATION_FORWARD));
    watermarks.set_applied(cache.highest_ref_of_type(query_types::MIGRATION_APPLIED));

    debug!(
        dqm = %label,
        loaded = watermarks.loaded(),
        applied = watermarks.applied(),
        empty_database,
        "Migration watermarks refreshed from bootstrap"
    );

    Ok(BootstrapOutcome {
        row_count,
        empty_database,
    })
}

fn decode_cache_row(row: &serde_json::Map<String, serde_json::Value>) -> Option<QueryCacheEntry> {
    let query_ref = row.get("query_ref")?.as_i64()?;
    let query_type = row.get("query_type")?.as_i64()? as i32;
    let sql_template = row.get("sql_template")?.as_str()?.to_string();
    Some(QueryCacheEntry {
        query_ref,
        query_type,
        sql_template,
        loaded_at: chrono::Utc::now(),
    })
}
