//! # Query Table Cache (QTC)
//!
//! In-memory `(ref, type) -> SQL template` lookup populated in bulk from
//! bootstrap query result sets. A Lead queue owns the cache and shares it by
//! reference with its children; it is read-mostly with a single writer at a
//! time (bootstrap refreshes run on the Lead's own worker).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// One cached query template.
#[derive(Debug, Clone)]
pub struct QueryCacheEntry {
    pub query_ref: i64,
    pub query_type: i32,
    pub sql_template: String,
    pub loaded_at: DateTime<Utc>,
}

/// The in-memory query template cache.
#[derive(Default)]
pub struct QueryCache {
    entries: RwLock<HashMap<(i64, i32), QueryCacheEntry>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire cache contents with a fresh bootstrap result set.
    pub fn replace_all(&self, entries: Vec<QueryCacheEntry>) {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            map.insert((entry.query_ref, entry.query_type), entry);
        }
        *self.entries.write() = map;
    }

    /// Look up a template by reference and type.
    pub fn lookup(&self, query_ref: i64, query_type: i32) -> Option<String> {
        self.entries
            .read()
            .get(&(query_ref, query_type))
            .map(|e| e.sql_template.clone())
    }

    /// Highest reference recorded for the given type, or 0 when none exist.
    pub fn highest_ref_of_type(&self, query_type: i32) -> i64 {
        self.entries
            .read()
            .keys()
            .filter(|(_, t)| *t == query_type)
            .map(|(r, _)| *r)
            .max()
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::query_types;

    fn entry(query_ref: i64, query_type: i32, sql: &str) -> QueryCacheEntry {
        QueryCacheEntry {
            query_ref,
            query_type,
            sql_template: sql.to_string(),
            loaded_at: Utc::now(),
        }
    }

    #[test]
    fn lookup_by_ref_and_type() {
        let cache = QueryCache::new();
        cache.replace_all(vec![
            entry(1001, query_types::MIGRATION_FORWARD, "CREATE TABLE a (id INT)"),
            entry(1001, query_types::MIGRATION_REVERSE, "DROP TABLE a"),
        ]);

        assert_eq!(
            cache.lookup(1001, query_types::MIGRATION_FORWARD).unwrap(),
            "CREATE TABLE a (id INT)"
        );
        assert_eq!(
            cache.lookup(1001, query_types::MIGRATION_REVERSE).unwrap(),
            "DROP TABLE a"
        );
        assert!(cache.lookup(1002, query_types::MIGRATION_FORWARD).is_none());
    }

    #[test]
    fn highest_ref_per_type() {
        let cache = QueryCache::new();
        cache.replace_all(vec![
            entry(1001, query_types::MIGRATION_FORWARD, "f1"),
            entry(1002, query_types::MIGRATION_FORWARD, "f2"),
            entry(1001, query_types::MIGRATION_APPLIED, "m1"),
        ]);

        assert_eq!(cache.highest_ref_of_type(query_types::MIGRATION_FORWARD), 1002);
        assert_eq!(cache.highest_ref_of_type(query_types::MIGRATION_APPLIED), 1001);
        assert_eq!(cache.highest_ref_of_type(query_types::MIGRATION_REVERSE), 0);
    }

    #[test]
    fn replace_all_discards_previous_contents() {
        let cache = QueryCache::new();
        cache.replace_all(vec![entry(1001, query_types::MIGRATION_FORWARD, "old")]);
        cache.replace_all(vec![entry(1002, query_types::MIGRATION_FORWARD, "new")]);

        assert!(cache.lookup(1001, query_types::MIGRATION_FORWARD).is_none());
        assert_eq!(cache.len(), 1);
    }
}
