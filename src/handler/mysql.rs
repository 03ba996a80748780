//! MySQL handler.

use crate::connection::ConnectionConfig;
use crate::error::{AskdbError, Result};
use crate::handler::types::{
    ColumnDescriptor, QueryResult, Row, SchemaSnapshot, TableDescriptor, TestResult, Value,
};
use crate::handler::{DataHandler, Operation, EXECUTE_TIMEOUT_SECS};
use async_trait::async_trait;
use futures::StreamExt;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column as SqlxColumn, Row as SqlxRow, TypeInfo};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;

const MAX_ROWS: usize = 10_000;

/// MySQL data handler.
#[derive(Debug)]
pub struct MySqlHandler {
    config: ConnectionConfig,
    pool: RwLock<Option<MySqlPool>>,
}

impl MySqlHandler {
    /// Creates an unconnected handler from a validated config.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            pool: RwLock::new(None),
        }
    }

    fn connection_string(&self) -> Result<String> {
        let host = self.config.require_str("host")?;
        let port = self.config.port().unwrap_or(3306);
        let database = self.config.require_str("database")?;
        let username = self.config.require_str("username")?;
        let mut url = format!("mysql://{username}");
        if let Some(password) = self.config.opt_str("password") {
            url.push(':');
            url.push_str(&password);
        }
        url.push_str(&format!("@{host}:{port}/{database}"));
        if self.config.opt_bool("ssl") {
            url.push_str("?ssl-mode=required");
        }
        Ok(url)
    }

    async fn pool(&self) -> Result<MySqlPool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| AskdbError::not_connected(self.config.id.clone()))
    }

    fn database(&self) -> String {
        self.config.opt_str("database").unwrap_or_default()
    }
}

#[async_trait]
impl DataHandler for MySqlHandler {
    async fn connect(&self) -> Result<()> {
        if self.pool.read().await.is_some() {
            return Ok(());
        }
        let conn_str = self.connection_string()?;
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&conn_str)
            .await
            .map_err(|e| AskdbError::connect_failed(e.to_string()))?;
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
        let conn_str = match self.connection_string() {
            Ok(s) => s,
            Err(e) => return TestResult::fail(0, e.to_string()),
        };
        let pool = match MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&conn_str)
            .await
        {
            Ok(pool) => pool,
            Err(e) => return TestResult::fail(start.elapsed().as_millis() as u64, e.to_string()),
        };

        let version: std::result::Result<String, sqlx::Error> =
            sqlx::query_scalar("SELECT VERSION()").fetch_one(&pool).await;
        let latency = start.elapsed().as_millis() as u64;
        pool.close().await;

        match version {
            Ok(v) => TestResult::ok(latency, Some(v)),
            Err(e) => TestResult::fail(latency, e.to_string()),
        }
    }

    async fn schema(&self, include_columns: bool) -> Result<SchemaSnapshot> {
        let pool = self.pool().await?;
        let database = self.database();

        // TABLE_ROWS is the engine's estimate; good enough for the fast list.
        let table_rows: Vec<(String, Option<i64>)> = sqlx::query_as(
            r#"
            SELECT table_name, table_rows
            FROM information_schema.tables
            WHERE table_schema = ? AND table_type = 'BASE TABLE'
            ORDER BY table_name
            "#,
        )
        .bind(&database)
        .fetch_all(&pool)
        .await
        .map_err(|e| AskdbError::query_failed(format!("Failed to fetch tables: {e}")))?;

        let mut tables: Vec<TableDescriptor> = table_rows
            .into_iter()
            .map(|(name, estimate)| TableDescriptor {
                name,
                schema_namespace: Some(database.clone()),
                columns: Vec::new(),
                row_count_estimate: estimate,
            })
            .collect();

        if include_columns {
            let column_rows: Vec<(String, String, String, String, String)> = sqlx::query_as(
                r#"
                SELECT table_name, column_name, column_type, is_nullable, column_key
                FROM information_schema.columns
                WHERE table_schema = ?
                ORDER BY table_name, ordinal_position
                "#,
            )
            .bind(&database)
            .fetch_all(&pool)
            .await
            .map_err(|e| AskdbError::query_failed(format!("Failed to fetch columns: {e}")))?;

            let mut by_table: std::collections::HashMap<String, Vec<ColumnDescriptor>> =
                std::collections::HashMap::new();
            for (table, column, column_type, is_nullable, column_key) in column_rows {
                by_table.entry(table).or_default().push(
                    ColumnDescriptor::new(column, column_type)
                        .nullable(is_nullable == "YES")
                        .primary_key(column_key == "PRI"),
                );
            }
            for table in &mut tables {
                table.columns = by_table.remove(&table.name).unwrap_or_default();
                table.row_count_estimate = None;
            }
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
                let my_row = row_result.map_err(|e| e.to_string())?;
                if columns.is_none() {
                    columns = Some(
                        my_row
                            .columns()
                            .iter()
                            .map(|c| c.name().to_string())
                            .collect(),
                    );
                }
                if rows.len() < MAX_ROWS {
                    rows.push(convert_row(&my_row));
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
            Ok(Ok(())) => {
                if truncated {
                    warn!(cap = MAX_ROWS, "query exceeded row cap, result truncated");
                }
                QueryResult::ok(columns.unwrap_or_default(), rows)
                    .with_execution_time_ms(elapsed)
                    .with_truncated(truncated)
            }
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

fn convert_row(row: &MySqlRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

fn convert_value(row: &MySqlRow, index: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "BOOLEAN" | "TINYINT(1)" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "FLOAT" | "DOUBLE" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),

        // DECIMAL has no f64 decode; take the text form and keep the digits.
        "DECIMAL" | "NUMERIC" => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::Text)
            .unwrap_or(Value::Null),

        "JSON" => row
            .try_get::<Option<serde_json::Value>, _>(index)
            .ok()
            .flatten()
            .map(Value::Json)
            .unwrap_or(Value::Null),

        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::Text)
            .unwrap_or(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::BackendKind;

    fn test_config() -> ConnectionConfig {
        ConnectionConfig::new("my-test", "test", BackendKind::Mysql)
            .with_option("host", "localhost")
            .with_option("database", "shop")
            .with_option("username", "app")
    }

    #[test]
    fn test_connection_string_shape() {
        let handler = MySqlHandler::new(test_config());
        assert_eq!(
            handler.connection_string().unwrap(),
            "mysql://app@localhost:3306/shop"
        );
    }

    #[tokio::test]
    async fn test_execute_before_connect_fails_softly() {
        let handler = MySqlHandler::new(test_config());
        let result = handler.execute("SELECT 1", None).await;
        assert!(!result.success);
    }
}
