//! Per-request tabular workspace.
//!
//! An in-process SQL context backed by an in-memory SQLite database. Results
//! from any handler are registered as named tables so later steps can join
//! and aggregate across heterogeneous sources. Each orchestrator run owns a
//! fresh workspace; dropping it releases the database.

pub mod chart;

pub use chart::{chartify_result, ChartData, ChartKind, Dataset};

use crate::error::{AskdbError, Result};
use crate::handler::types::{QueryResult, Row, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column as SqlxColumn, Row as SqlxRow, TypeInfo};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Instant;

/// SQLite's identifier length cap applied to normalised table names.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Summary of one registered table, as shown to the LLM.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TableSummary {
    /// Column names in table order.
    pub columns: Vec<String>,
    /// Number of rows in the table.
    pub row_count: usize,
}

/// The per-request workspace.
pub struct Workspace {
    pool: SqlitePool,
    /// proposed name → final table name.
    registered: BTreeMap<String, String>,
}

impl Workspace {
    /// Opens a fresh in-memory workspace.
    ///
    /// The pool is capped at one connection: each pooled connection of an
    /// in-memory SQLite database would otherwise see its own empty database.
    pub async fn new() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| AskdbError::internal(format!("workspace options: {e}")))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| AskdbError::internal(format!("Failed to open workspace: {e}")))?;
        Ok(Self {
            pool,
            registered: BTreeMap::new(),
        })
    }

    /// Registers a query result under a proposed name and returns the final
    /// (normalised, disambiguated) table name.
    ///
    /// Re-registering the same proposed name replaces the table's content; a
    /// different proposed name that normalises onto an existing table gets a
    /// numeric suffix.
    pub async fn register(&mut self, proposed: &str, result: &QueryResult) -> Result<String> {
        let final_name = match self.registered.get(proposed) {
            Some(existing) => existing.clone(),
            None => {
                let base = normalize_identifier(proposed);
                let mut candidate = base.clone();
                let mut suffix = 2;
                while self.registered.values().any(|v| v == &candidate) {
                    let tail = format!("_{suffix}");
                    let mut trimmed = base.clone();
                    trimmed.truncate(MAX_IDENTIFIER_LEN - tail.len());
                    candidate = format!("{trimmed}{tail}");
                    suffix += 1;
                }
                candidate
            }
        };

        let types = infer_column_types(result);
        let quoted = quote_identifier(&final_name);

        sqlx::query(&format!("DROP TABLE IF EXISTS {quoted}"))
            .execute(&self.pool)
            .await
            .map_err(|e| AskdbError::workspace_sql(e.to_string()))?;

        let column_defs: Vec<String> = result
            .columns
            .iter()
            .zip(types.iter())
            .map(|(name, ty)| format!("{} {}", quote_identifier(name), ty.sql_type()))
            .collect();
        sqlx::query(&format!(
            "CREATE TABLE {quoted} ({})",
            column_defs.join(", ")
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| AskdbError::workspace_sql(e.to_string()))?;

        if !result.rows.is_empty() {
            let placeholders: Vec<&str> = result.columns.iter().map(|_| "?").collect();
            let insert = format!("INSERT INTO {quoted} VALUES ({})", placeholders.join(", "));
            for row in &result.rows {
                let mut query = sqlx::query(&insert);
                for cell in row {
                    query = bind_cell(query, cell);
                }
                query
                    .execute(&self.pool)
                    .await
                    .map_err(|e| AskdbError::workspace_sql(e.to_string()))?;
            }
        }

        self.registered
            .insert(proposed.to_string(), final_name.clone());
        Ok(final_name)
    }

    /// Executes SQL against the workspace tables.
    pub async fn sql(&self, query: &str) -> Result<QueryResult> {
        let start = Instant::now();
        let rows: Vec<SqliteRow> = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AskdbError::workspace_sql(e.to_string()))?;

        let columns: Vec<String> = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect()
            })
            .unwrap_or_default();
        let data: Vec<Row> = rows.iter().map(convert_row).collect();
        Ok(QueryResult::ok(columns, data)
            .with_execution_time_ms(start.elapsed().as_millis() as u64))
    }

    /// Returns whether a final table name exists in the workspace.
    pub fn has_table(&self, name: &str) -> bool {
        self.registered.values().any(|v| v == name)
    }

    /// Returns the final names of every registered table.
    pub fn table_names(&self) -> std::collections::BTreeSet<String> {
        self.registered.values().cloned().collect()
    }

    /// Summarises every registered table for LLM context.
    pub async fn describe(&self) -> Result<BTreeMap<String, TableSummary>> {
        let mut out = BTreeMap::new();
        for final_name in self.registered.values() {
            let quoted = quote_identifier(final_name);
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {quoted}"))
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AskdbError::workspace_sql(e.to_string()))?;
            let columns: Vec<(i64, String, String, i64, Option<String>, i64)> =
                sqlx::query_as(&format!("PRAGMA table_info({quoted})"))
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| AskdbError::workspace_sql(e.to_string()))?;
            out.insert(
                final_name.clone(),
                TableSummary {
                    columns: columns.into_iter().map(|c| c.1).collect(),
                    row_count: count as usize,
                },
            );
        }
        Ok(out)
    }

    /// Formats the workspace summary as compact text for LLM prompts.
    pub async fn describe_for_llm(&self) -> Result<String> {
        let summary = self.describe().await?;
        if summary.is_empty() {
            return Ok("(no tables yet)".to_string());
        }
        let mut out = String::new();
        for (name, table) in summary {
            out.push_str(&format!(
                "{name} ({} rows): {}\n",
                table.row_count,
                table.columns.join(", ")
            ));
        }
        Ok(out)
    }

    /// Projects a registered table into chart-ready data.
    pub async fn chartify(&self, table: &str, hint: &str) -> Result<ChartData> {
        if !self.has_table(table) {
            return Err(AskdbError::workspace_sql(format!(
                "no such table '{table}' in the workspace"
            )));
        }
        let result = self
            .sql(&format!("SELECT * FROM {}", quote_identifier(table)))
            .await?;
        chartify_result(table, &result, hint)
    }
}

/// SQLite column affinities used when materialising results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }
}

/// Infers a column type from observed cells: integer when every non-null cell
/// is integer-valued, real when every non-null cell is numeric, text
/// otherwise. JSON cells are stored serialised, hence text.
fn infer_column_types(result: &QueryResult) -> Vec<ColumnType> {
    (0..result.columns.len())
        .map(|i| {
            let mut ty = ColumnType::Integer;
            let mut saw_value = false;
            for row in &result.rows {
                match row.get(i).unwrap_or(&Value::Null) {
                    Value::Null => {}
                    Value::Int(_) | Value::Bool(_) => saw_value = true,
                    Value::Float(_) => {
                        saw_value = true;
                        if ty == ColumnType::Integer {
                            ty = ColumnType::Real;
                        }
                    }
                    Value::Text(_) | Value::Json(_) => {
                        ty = ColumnType::Text;
                        break;
                    }
                }
            }
            if saw_value || ty == ColumnType::Text {
                ty
            } else {
                // All-null columns default to text.
                ColumnType::Text
            }
        })
        .collect()
}

/// Normalises a proposed table name into a valid SQL identifier: lowercase,
/// non-identifier characters replaced with underscores, 63-char cap, and a
/// leading letter guaranteed.
pub fn normalize_identifier(proposed: &str) -> String {
    let mut out: String = proposed
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out = format!("t_{out}");
    }
    out.truncate(MAX_IDENTIFIER_LEN);
    out
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn bind_cell<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    cell: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match cell {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b as i64),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.as_str()),
        Value::Json(j) => query.bind(j.to_string()),
    }
}

fn convert_row(row: &SqliteRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| match col.type_info().name().to_uppercase().as_str() {
            "INTEGER" | "INT" | "BIGINT" => row
                .try_get::<Option<i64>, _>(i)
                .ok()
                .flatten()
                .map(Value::Int)
                .unwrap_or(Value::Null),
            "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => row
                .try_get::<Option<f64>, _>(i)
                .ok()
                .flatten()
                .map(Value::Float)
                .unwrap_or(Value::Null),
            _ => row
                .try_get::<Option<String>, _>(i)
                .ok()
                .flatten()
                .map(Value::Text)
                .unwrap_or(Value::Null),
        })
        .collect()
}
