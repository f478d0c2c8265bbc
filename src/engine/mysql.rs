//! # MySQL Engine
//!
//! [`DatabaseEngine`] implementation over a single sqlx `MySqlConnection`.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::{Column, Connection, Row};
use tracing::debug;

use super::postgres::returns_rows;
use super::{
    render_parameters, ConnectionConfig, DatabaseEngine, EngineConnection, EngineKind,
    IsolationLevel, QueryRequest, QueryResult,
};
use crate::error::{DqmError, Result};

pub struct MySqlEngine;

#[async_trait]
impl DatabaseEngine for MySqlEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Mysql
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn EngineConnection>> {
        let url = config
            .connection_string
            .clone()
            .unwrap_or_else(|| self.build_connection_string(config));

        let conn = MySqlConnection::connect(&url)
            .await
            .map_err(|e| DqmError::connection("mysql", e.to_string()))?;

        debug!("MySQL connection established");
        Ok(Box::new(MySqlEngineConnection { conn: Some(conn) }))
    }

    fn build_connection_string(&self, config: &ConnectionConfig) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            config.username.as_deref().unwrap_or(""),
            config.password.as_deref().unwrap_or(""),
            config.host.as_deref().unwrap_or("localhost"),
            config.port.unwrap_or_else(|| self.kind().default_port()),
            config.database.as_deref().unwrap_or(""),
        )
    }

    fn validate_connection_string(&self, connection_string: &str) -> bool {
        connection_string.starts_with("mysql://")
    }

    fn escape_string(&self, raw: &str) -> String {
        raw.replace('\\', "\\\\").replace('\'', "''")
    }
}

struct MySqlEngineConnection {
    conn: Option<MySqlConnection>,
}

impl MySqlEngineConnection {
    fn live(&mut self) -> Result<&mut MySqlConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| DqmError::connection("mysql", "connection already released"))
    }
}

#[async_trait]
impl EngineConnection for MySqlEngineConnection {
    fn kind(&self) -> EngineKind {
        EngineKind::Mysql
    }

    async fn health_check(&mut self) -> bool {
        match self.conn.as_mut() {
            Some(conn) => conn.ping().await.is_ok(),
            None => false,
        }
    }

    async fn execute(&mut self, request: &QueryRequest) -> Result<QueryResult> {
        let sql = render_parameters(&request.sql_template, &request.parameters_json, &|raw| {
            raw.replace('\\', "\\\\").replace('\'', "''")
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
        let conn = self.live()?;
        let set_isolation = format!("SET TRANSACTION ISOLATION LEVEL {}", isolation.as_sql());
        sqlx::query(&set_isolation)
            .execute(&mut *conn)
            .await
            .map_err(|e| DqmError::query_execution("begin", e.to_string()))?;
        sqlx::query("START TRANSACTION")
            .execute(&mut *conn)
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
                .map_err(|e| DqmError::connection("mysql", e.to_string()))?;
        }
        Ok(())
    }
}

fn row_to_json(row: &MySqlRow) -> serde_json::Map<String, Value> {
    let mut map = serde_json::Map::with_capacity(row.columns().len());
    for column in row.columns() {
        map.insert(column.name().to_string(), decode_column(row, column.ordinal()));
    }
    map
}

fn decode_column(row: &MySqlRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(Value::String).unwrap_or(Value::Null);
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
        let engine = MySqlEngine;
        let config = ConnectionConfig {
            host: Some("mysql.internal".to_string()),
            port: Some(3307),
            database: Some("orders".to_string()),
            username: Some("app".to_string()),
            password: Some("pw".to_string()),
            connection_string: None,
            timeout_seconds: 30,
        };
        assert_eq!(
            engine.build_connection_string(&config),
            "mysql://app:pw@mysql.internal:3307/orders"
        );
    }

    #[test]
    fn escape_handles_backslashes() {
        let engine = MySqlEngine;
        assert_eq!(engine.escape_string(r"a\b'c"), r"a\\b''c");
    }
}
