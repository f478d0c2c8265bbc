//! # SQLite Engine
//!
//! [`DatabaseEngine`] implementation over a single sqlx `SqliteConnection`.
//! The connection string is either a `sqlite:` URL or a bare filesystem
//! path; the database file is created on first use.

use std::str::FromStr;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection, Row};
use tracing::debug;

use super::postgres::returns_rows;
use super::{
    render_parameters, ConnectionConfig, DatabaseEngine, EngineConnection, EngineKind,
    IsolationLevel, QueryRequest, QueryResult,
};
use crate::error::{DqmError, Result};

pub struct SqliteEngine;

#[async_trait]
impl DatabaseEngine for SqliteEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn EngineConnection>> {
        let locator = config
            .connection_string
            .clone()
            .or_else(|| config.database.clone())
            .unwrap_or_else(|| ":memory:".to_string());

        let options = if locator.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(&locator)
                .map_err(|e| DqmError::connection("sqlite", e.to_string()))?
                .create_if_missing(true)
        } else {
            SqliteConnectOptions::new()
                .filename(&locator)
                .create_if_missing(true)
        };

        let conn = options
            .connect()
            .await
            .map_err(|e| DqmError::connection("sqlite", e.to_string()))?;

        debug!("SQLite connection established");
        Ok(Box::new(SqliteEngineConnection { conn: Some(conn) }))
    }

    fn build_connection_string(&self, config: &ConnectionConfig) -> String {
        config
            .database
            .clone()
            .unwrap_or_else(|| ":memory:".to_string())
    }

    fn validate_connection_string(&self, connection_string: &str) -> bool {
        connection_string.starts_with("sqlite:") || !connection_string.contains("://")
    }
}

struct SqliteEngineConnection {
    conn: Option<SqliteConnection>,
}

impl SqliteEngineConnection {
    fn live(&mut self) -> Result<&mut SqliteConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| DqmError::connection("sqlite", "connection already released"))
    }
}

#[async_trait]
impl EngineConnection for SqliteEngineConnection {
    fn kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    async fn health_check(&mut self) -> bool {
        match self.conn.as_mut() {
            Some(conn) => conn.ping().await.is_ok(),
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

    async fn begin(&mut self, _isolation: IsolationLevel) -> Result<()> {
        // SQLite transactions are always serializable; the level is ignored.
        sqlx::query("BEGIN")
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
                .map_err(|e| DqmError::connection("sqlite", e.to_string()))?;
        }
        Ok(())
    }
}

fn row_to_json(row: &SqliteRow) -> serde_json::Map<String, Value> {
    let mut map = serde_json::Map::with_capacity(row.columns().len());
    for column in row.columns() {
        map.insert(column.name().to_string(), decode_column(row, column.ordinal()));
    }
    map
}

fn decode_column(row: &SqliteRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
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
    Value::Null
}
