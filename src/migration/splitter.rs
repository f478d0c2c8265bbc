//! # Multi-Statement SQL Splitter
//!
//! Migration SQL arrives as one template carrying multiple statements
//! separated by an explicit delimiter comment. Splitting is required
//! uniformly across engines, not just the ones whose drivers reject
//! multi-statement execution.

/// Split SQL into individual statements on the given delimiter line.
/// Statements are trimmed; empty fragments are dropped.
pub fn split_sql_statements(sql: &str, delimiter: &str) -> Vec<String> {
    sql.split(delimiter)
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty())
        .map(str::to_string)
        .collect()
}
