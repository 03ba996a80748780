//! SQLite handler.
//!
//! Opens a database file with an explicit access mode and serves the uniform
//! query contract from a single pooled connection.

use crate::connection::ConnectionConfig;
use crate::error::{AskdbError, Result};
use crate::handler::types::{
    ColumnDescriptor, QueryResult, Row, SchemaSnapshot, TableDescriptor, TestResult, Value,
};
use crate::handler::{DataHandler, Operation, EXECUTE_TIMEOUT_SECS};
use async_trait::async_trait;
use futures::StreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column as SqlxColumn, Row as SqlxRow, TypeInfo};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const MAX_ROWS: usize = 10_000;

/// SQLite data handler.
#[derive(Debug)]
pub struct SqliteHandler {
    config: ConnectionConfig,
    pool: RwLock<Option<SqlitePool>>,
}

impl SqliteHandler {
    /// Creates an unconnected handler from a validated config.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            pool: RwLock::new(None),
        }
    }

    fn open_options(&self) -> Result<SqliteConnectOptions> {
        let path = self.config.require_str("filePath")?;
        let mode = self
            .config
            .opt_str("mode")
            .unwrap_or_else(|| "readwrite".to_string());

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{path}"))
            .map_err(|e| AskdbError::config_invalid(format!("Invalid database path: {e}")))?
            .busy_timeout(Duration::from_secs(5));

        match mode.as_str() {
            "readonly" => Ok(options.read_only(true)),
            "readwrite" => Ok(options),
            "readwritecreate" => Ok(options.create_if_missing(true)),
            other => Err(AskdbError::config_invalid(format!(
                "unknown sqlite mode '{other}'"
            ))),
        }
    }

    async fn pool(&self) -> Result<SqlitePool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| AskdbError::not_connected(self.config.id.clone()))
    }
}

#[async_trait]
impl DataHandler for SqliteHandler {
    async fn connect(&self) -> Result<()> {
        if self.pool.read().await.is_some() {
            return Ok(());
        }
        let options = self.open_options()?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| AskdbError::connect_failed(format!("Cannot open database: {e}")))?;
        *self.pool.write().await = Some(pool);
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
    }

    async fn test(&self) -> TestResult {
        let start = Instant::now();
        let options = match self.open_options() {
            Ok(o) => o,
            Err(e) => return TestResult::fail(0, e.to_string()),
        };
        let pool = match SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
        {
            Ok(pool) => pool,
            Err(e) => return TestResult::fail(start.elapsed().as_millis() as u64, e.to_string()),
        };
        let version: std::result::Result<String, sqlx::Error> =
            sqlx::query_scalar("SELECT sqlite_version()")
                .fetch_one(&pool)
                .await;
        let latency = start.elapsed().as_millis() as u64;
        pool.close().await;
        match version {
            Ok(v) => TestResult::ok(latency, Some(format!("SQLite {v}"))),
            Err(e) => TestResult::fail(latency, e.to_string()),
        }
    }

    async fn schema(&self, include_columns: bool) -> Result<SchemaSnapshot> {
        let pool = self.pool().await?;

        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT name FROM sqlite_master
            WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#,
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| AskdbError::query_failed(format!("Failed to fetch tables: {e}")))?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let columns = if include_columns {
                let rows: Vec<(i64, String, String, i64, Option<String>, i64)> =
                    sqlx::query_as(&format!("PRAGMA table_info(\"{name}\")"))
                        .fetch_all(&pool)
                        .await
                        .map_err(|e| {
                            AskdbError::query_failed(format!("Failed to describe {name}: {e}"))
                        })?;
                rows.into_iter()
                    .map(|(_, col_name, col_type, notnull, _, pk)| {
                        ColumnDescriptor::new(col_name, col_type.to_lowercase())
                            .nullable(notnull == 0)
                            .primary_key(pk > 0)
                    })
                    .collect()
            } else {
                Vec::new()
            };
            tables.push(TableDescriptor {
                name,
                schema_namespace: None,
                columns,
                row_count_estimate: None,
            });
        }

        Ok(SchemaSnapshot { tables })
    }

    async fn execute(&self, query: &str, _params: Option<&serde_json::Value>) -> QueryResult {
        let pool = match self.pool().await {
            Ok(pool) => pool,
            Err(e) => return QueryResult::fail(e.to_string()),
        };

        let start = Instant::now();
        let mut stream = sqlx::query(query).fetch(&pool);
        let mut columns: Option<Vec<String>> = None;
        let mut rows: Vec<Row> = Vec::new();
        let mut truncated = false;

        let collected = tokio::time::timeout(Duration::from_secs(EXECUTE_TIMEOUT_SECS), async {
            while let Some(row_result) = stream.next().await {
                let sq_row = row_result.map_err(|e| e.to_string())?;
                if columns.is_none() {
                    columns = Some(
                        sq_row
                            .columns()
                            .iter()
                            .map(|c| c.name().to_string())
                            .collect(),
                    );
                }
                if rows.len() < MAX_ROWS {
                    rows.push(convert_row(&sq_row));
                } else {
                    truncated = true;
                    break;
                }
            }
            Ok::<_, String>(())
        })
        .await;

        let elapsed = start.elapsed().as_millis() as u64;
        match collected {
            Err(_) => QueryResult::fail(format!(
                "Query timed out after {EXECUTE_TIMEOUT_SECS} seconds"
            ))
            .with_execution_time_ms(elapsed),
            Ok(Err(message)) => QueryResult::fail(message).with_execution_time_ms(elapsed),
            Ok(Ok(())) => QueryResult::ok(columns.unwrap_or_default(), rows)
                .with_execution_time_ms(elapsed)
                .with_truncated(truncated),
        }
    }

    fn supported_operations(&self) -> &'static [Operation] {
        &[
            Operation::Select,
            Operation::Insert,
            Operation::Update,
            Operation::Delete,
            Operation::Aggregate,
        ]
    }
}

fn convert_row(row: &SqliteRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

fn convert_value(row: &SqliteRow, index: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        "INTEGER" | "INT" | "INT4" | "INT8" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),

        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::Text)
            .unwrap_or(Value::Null),
    }
}
