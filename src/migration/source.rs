//! # Migration Sources
//!
//! Where migration scripts come from. The LOAD phase executes scripts that
//! insert metadata rows (type 1000) into the queries table - no schema
//! changes happen during LOAD, only population of the query cache's backing
//! store. The filesystem source discovers `<basename>_<NNNNN>.sql` files in
//! a configured directory; the highest number becomes the `available`
//! watermark.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::constants::QUERY_DELIMITER;
use crate::engine::EngineConnection;
use crate::error::{DqmError, Result};
use crate::migration::execute_migration_sql;

/// One discovered migration script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    pub number: i64,
    pub path: PathBuf,
}

/// Capability producing migration scripts for a database.
#[async_trait]
pub trait MigrationSource: Send + Sync {
    /// Human-readable description for logs.
    fn describe(&self) -> String;

    /// True when at least one script is present.
    fn validate(&self, label: &str) -> bool;

    /// Highest script number discovered, or 0 when none exist.
    fn latest_available(&self) -> i64;

    /// LOAD phase: execute every discovered script against the connection,
    /// each inside its own transaction, stopping at the first failure.
    /// Returns the number of scripts executed.
    async fn load(&self, conn: &mut dyn EngineConnection, label: &str) -> Result<usize>;
}

/// Source for databases with no migrations configured.
pub struct NullMigrationSource;

#[async_trait]
impl MigrationSource for NullMigrationSource {
    fn describe(&self) -> String {
        "none".to_string()
    }

    fn validate(&self, _label: &str) -> bool {
        false
    }

    fn latest_available(&self) -> i64 {
        0
    }

    async fn load(&self, _conn: &mut dyn EngineConnection, _label: &str) -> Result<usize> {
        Ok(0)
    }
}

/// Filesystem-backed migration source.
///
/// The configured path names a directory whose basename doubles as the
/// script prefix: `./migrations/orders` matches
/// `./migrations/orders/orders_01000.sql`, `orders_01001.sql`, ...
pub struct FilesystemMigrationSource {
    directory: PathBuf,
    basename: String,
}

impl FilesystemMigrationSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let directory = path.as_ref().to_path_buf();
        let basename = directory
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            directory,
            basename,
        }
    }

    /// All scripts in ascending number order.
    pub fn discover(&self) -> Vec<MigrationScript> {
        let mut scripts = Vec::new();
        let entries = match std::fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(_) => return scripts,
        };

        let prefix = format!("{}_", self.basename);
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(number) = parse_script_number(file_name, &prefix) else {
                continue;
            };
            scripts.push(MigrationScript { number, path });
        }

        scripts.sort_by_key(|s| s.number);
        scripts
    }
}

/// Parse `<prefix><number>.sql` into the script number. Numbers are 1-6
/// digits, matching the source layout.
fn parse_script_number(file_name: &str, prefix: &str) -> Option<i64> {
    let rest = file_name.strip_prefix(prefix)?;
    let number_part = rest.strip_suffix(".sql")?;
    if number_part.is_empty() || number_part.len() > 6 {
        return None;
    }
    if !number_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    number_part.parse().ok()
}

#[async_trait]
impl MigrationSource for FilesystemMigrationSource {
    fn describe(&self) -> String {
        self.directory.display().to_string()
    }

    fn validate(&self, label: &str) -> bool {
        let scripts = self.discover();
        match scripts.first() {
            Some(first) => {
                debug!(
                    dqm = %label,
                    path = %first.path.display(),
                    "Found first migration script"
                );
                true
            }
            None => {
                debug!(
                    dqm = %label,
                    directory = %self.directory.display(),
                    "No migration scripts found"
                );
                false
            }
        }
    }

    fn latest_available(&self) -> i64 {
        self.discover().last().map(|s| s.number).unwrap_or(0)
    }

    async fn load(&self, conn: &mut dyn EngineConnection, label: &str) -> Result<usize> {
        let scripts = self.discover();
        let mut executed = 0usize;

        for script in &scripts {
            let sql = std::fs::read_to_string(&script.path).map_err(|e| {
                DqmError::migration(
                    label,
                    format!("cannot read {}: {e}", script.path.display()),
                )
            })?;

            if let Err(e) =
                execute_migration_sql(conn, &sql, script.number, QUERY_DELIMITER, label).await
            {
                error!(
                    dqm = %label,
                    script = %script.path.display(),
                    error = %e,
                    "Migration load script failed"
                );
                return Err(e);
            }
            executed += 1;
        }

        info!(dqm = %label, scripts = executed, "Migration load phase executed scripts");
        Ok(executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_script(dir: &Path, name: &str, body: &str) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn discovers_scripts_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("orders");
        std::fs::create_dir(&dir).unwrap();
        write_script(&dir, "orders_01002.sql", "SELECT 2");
        write_script(&dir, "orders_01000.sql", "SELECT 0");
        write_script(&dir, "orders_01001.sql", "SELECT 1");
        write_script(&dir, "orders_abc.sql", "not a migration");
        write_script(&dir, "unrelated.txt", "nope");

        let source = FilesystemMigrationSource::new(&dir);
        let scripts = source.discover();
        assert_eq!(
            scripts.iter().map(|s| s.number).collect::<Vec<_>>(),
            vec![1000, 1001, 1002]
        );
        assert_eq!(source.latest_available(), 1002);
        assert!(source.validate("DQM-test-00-SMFC"));
    }

    #[test]
    fn missing_directory_is_empty_not_fatal() {
        let source = FilesystemMigrationSource::new("/nonexistent/orders");
        assert!(source.discover().is_empty());
        assert_eq!(source.latest_available(), 0);
        assert!(!source.validate("DQM-test-00-SMFC"));
    }

    #[test]
    fn script_number_parsing() {
        assert_eq!(parse_script_number("orders_01000.sql", "orders_"), Some(1000));
        assert_eq!(parse_script_number("orders_1.sql", "orders_"), Some(1));
        assert_eq!(parse_script_number("orders_1234567.sql", "orders_"), None);
        assert_eq!(parse_script_number("orders_01x0.sql", "orders_"), None);
        assert_eq!(parse_script_number("other_01000.sql", "orders_"), None);
        assert_eq!(parse_script_number("orders_.sql", "orders_"), None);
    }

    #[tokio::test]
    async fn null_source_loads_nothing() {
        use crate::engine::{ConnectionConfig, DatabaseEngine, EngineKind, MockEngine};

        let engine = MockEngine::new(EngineKind::Sqlite);
        let mut conn = engine.connect(&ConnectionConfig::default()).await.unwrap();
        let source = NullMigrationSource;
        assert!(!source.validate("x"));
        assert_eq!(source.load(&mut *conn, "x").await.unwrap(), 0);
    }
}
