//! # PostgreSQL Engine
//!
//! [`DatabaseEngine`] implementation over a single sqlx `PgConnection`.
//! Each queue owns its connection exclusively, so no pool is involved.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Column, Connection, Row};
use tracing::debug;

use super::{
    render_parameters, ConnectionConfig, DatabaseEngine, EngineConnection, EngineKind,
    IsolationLevel, QueryRequest, QueryResult,
};
use crate::error::{DqmError, Result};

pub struct PostgresEngine;

#[async_trait]
impl DatabaseEngine for PostgresEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Postgresql
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn EngineConnection>> {
        let url = config
            .connection_string
            .clone()
            .unwrap_or_else(|| self.build_connection_string(config));

        let conn = PgConnection::connect(&url)
            .await
            .map_err(|e| DqmError::connection("postgresql", e.to_string()))?;

        debug!("PostgreSQL connection established");
        Ok(Box::new(PostgresConnection { conn: Some(conn) }))
    }

    fn build_connection_string(&self, config: &ConnectionConfig) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            config.username.as_deref().unwrap_or(""),
            config.password.as_deref().unwrap_or(""),
            config.host.as_deref().unwrap_or("localhost"),
            config.port.unwrap_or_else(|| self.kind().default_port()),
            config.database.as_deref().unwrap_or("postgres"),
        )
    }

    fn validate_connection_string(&self, connection_string: &str) -> bool {
        connection_string.starts_with("postgresql://")
    }
}

struct PostgresConnection {
    conn: Option<PgConnection>,
}

impl PostgresConnection {
    fn live(&mut self) -> Result<&mut PgConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| DqmError::connection("postgresql", "connection already released"))
    }
}

#[async_trait]
impl EngineConnection for PostgresConnection {
    fn kind(&self) -> EngineKind {
        EngineKind::Postgresql
    }

    async fn health_check(&mut self) -> bool {
        match self.conn.as_mut() {
            Some(conn) => sqlx::query("SELECT 1").execute(conn).await.is_ok(),
            None => false,
        }
    }

    async fn execute(&mut self, request: &QueryRequest) -> Result<QueryResult> {
        let sql = render_parameters(&request.sql_template, &request.parameters_json, &|raw| {
            raw.replace('\'', "''")
        })?;
        let conn = self.live()?;
        let started = Instant::now();

        if returns_rows(&sql) {
            let rows = sqlx::query(&sql)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| DqmError::query_execution(&request.query_id, e.to_string()))?;
            let column_count = rows.first().map(|r| r.columns().len()).unwrap_or(0);
            Ok(QueryResult {
                success: true,
                rows: rows.iter().map(row_to_json).collect(),
                column_count,
                affected_rows: 0,
                error_message: None,
                execution_time_ms: started.elapsed().as_millis() as u64,
            })
        } else {
            let done = sqlx::query(&sql)
                .execute(&mut *conn)
                .await
                .map_err(|e| DqmError::query_execution(&request.query_id, e.to_string()))?;
            Ok(QueryResult {
                success: true,
                rows: Vec::new(),
                column_count: 0,
                affected_rows: done.rows_affected(),
                error_message: None,
                execution_time_ms: started.elapsed().as_millis() as u64,
            })
        }
    }

    async fn begin(&mut self, isolation: IsolationLevel) -> Result<()> {
        let sql = format!("BEGIN ISOLATION LEVEL {}", isolation.as_sql());
        sqlx::query(&sql)
            .execute(self.live()?)
            .await
            .map_err(|e| DqmError::query_execution("begin", e.to_string()))?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        sqlx::query("COMMIT")
            .execute(self.live()?)
            .await
            .map_err(|e| DqmError::query_execution("commit", e.to_string()))?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        sqlx::query("ROLLBACK")
            .execute(self.live()?)
            .await
            .map_err(|e| DqmError::query_execution("rollback", e.to_string()))?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .await
                .map_err(|e| DqmError::connection("postgresql", e.to_string()))?;
        }
        Ok(())
    }
}

/// Statements that produce a result set are fetched; everything else is
/// executed for its row count.
pub(crate) fn returns_rows(sql: &str) -> bool {
    let head = sql.trim_start().to_ascii_uppercase();
    head.starts_with("SELECT")
        || head.starts_with("WITH")
        || head.starts_with("SHOW")
        || head.starts_with("VALUES")
        || head.starts_with("EXPLAIN")
}

fn row_to_json(row: &PgRow) -> serde_json::Map<String, Value> {
    let mut map = serde_json::Map::with_capacity(row.columns().len());
    for column in row.columns() {
        map.insert(column.name().to_string(), decode_column(row, column.ordinal()));
    }
    map
}

/// Decode a column into JSON by attempting the common Rust types in order.
/// sqlx rejects mismatched types cleanly, so failed attempts fall through.
fn decode_column(row: &PgRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
        return v.map(|f| Value::from(f as f64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(Value::String).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<uuid::Uuid>, _>(idx) {
        return v.map(|u| Value::String(u.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
        return v.map(|t| Value::String(t.to_rfc3339())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
        return v.map(|t| Value::String(t.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Value>, _>(idx) {
        return v.unwrap_or(Value::Null);
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_string_assembly() {
        let engine = PostgresEngine;
        let config = ConnectionConfig {
            host: Some("db.internal".to_string()),
            port: None,
            database: Some("orders".to_string()),
            username: Some("app".to_string()),
            password: Some("pw".to_string()),
            connection_string: None,
            timeout_seconds: 30,
        };
        assert_eq!(
            engine.build_connection_string(&config),
            "postgresql://app:pw@db.internal:5432/orders"
        );
    }

    #[test]
    fn statement_classification() {
        assert!(returns_rows("SELECT 1"));
        assert!(returns_rows("  with x as (select 1) select * from x"));
        assert!(!returns_rows("INSERT INTO t VALUES (1)"));
        assert!(!returns_rows("UPDATE t SET a = 1"));
        assert!(!returns_rows("CREATE TABLE t (id INT)"));
    }
}
