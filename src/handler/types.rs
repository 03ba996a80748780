//! Result and schema types shared by every data handler.
//!
//! Defines the uniform tabular value returned from any backend, the lazy
//! schema snapshot, and the connection test report.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single cell value from any backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    /// NULL / missing value.
    #[default]
    Null,

    /// Boolean value.
    Bool(bool),

    /// Signed integer (up to i64).
    Int(i64),

    /// Floating point number.
    Float(f64),

    /// Text value.
    Text(String),

    /// Nested object or array (documents, API payloads).
    Json(serde_json::Value),
}

impl Value {
    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true if this value is numeric (integer or float).
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Returns the value as f64 when numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Renders the value for display and for label columns in charts.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
            Value::Json(j) => j.to_string(),
        }
    }

    /// Converts a JSON value into a cell, mapping scalars onto native variants.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Json(other),
        }
    }

    /// Converts the cell back into a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Json(j) => j.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

/// A row of cells, positionally aligned with `QueryResult::columns`.
pub type Row = Vec<Value>;

/// The uniform tabular result of executing a query against any handler.
///
/// Handlers never raise across the query interface; failures are reported
/// through `success = false` and `error`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    /// Whether the query succeeded.
    pub success: bool,

    /// Ordered column names of the result set.
    pub columns: Vec<String>,

    /// Rows of data; each row has one cell per column.
    pub rows: Vec<Row>,

    /// Number of rows returned.
    pub row_count: usize,

    /// Time taken to execute the query, in milliseconds.
    pub execution_time_ms: u64,

    /// Error description when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Whether the result was truncated at the handler's row cap.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl QueryResult {
    /// Creates a successful result with the given columns and rows.
    pub fn ok(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let row_count = rows.len();
        Self {
            success: true,
            columns,
            rows,
            row_count,
            execution_time_ms: 0,
            error: None,
            truncated: false,
        }
    }

    /// Creates a failed result carrying an error message.
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Sets the execution time in milliseconds.
    pub fn with_execution_time_ms(mut self, ms: u64) -> Self {
        self.execution_time_ms = ms;
        self
    }

    /// Marks the result as truncated at a row cap.
    pub fn with_truncated(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }

    /// Returns true if the result set has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Serialises rows as JSON objects keyed by column name.
    ///
    /// This is the wire shape used by the HTTP layer and in tool payloads.
    pub fn row_objects(&self) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .map(|row| {
                let map: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .zip(row.iter())
                    .map(|(col, cell)| (col.clone(), cell.to_json()))
                    .collect();
                serde_json::Value::Object(map)
            })
            .collect()
    }
}

/// Metadata for one column of a described table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,

    /// Backend-declared type string (e.g. "integer", "varchar(255)").
    pub type_string: String,

    /// Whether the column accepts NULL.
    pub nullable: bool,

    /// Whether the column is part of the primary key.
    pub primary_key: bool,
}

impl ColumnDescriptor {
    /// Creates a nullable, non-key column descriptor.
    pub fn new(name: impl Into<String>, type_string: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_string: type_string.into(),
            nullable: true,
            primary_key: false,
        }
    }

    /// Sets the nullable flag.
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Marks the column as part of the primary key.
    pub fn primary_key(mut self, pk: bool) -> Self {
        self.primary_key = pk;
        self
    }
}

/// Metadata for one table (or collection, or virtual table) of a connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableDescriptor {
    /// Table name.
    pub name: String,

    /// Schema namespace (e.g. "public"), when the backend has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_namespace: Option<String>,

    /// Column descriptors; empty when columns were elided for speed.
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,

    /// Row count estimate from backend metadata, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count_estimate: Option<i64>,
}

impl TableDescriptor {
    /// Creates a descriptor with just a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema_namespace: None,
            columns: Vec::new(),
            row_count_estimate: None,
        }
    }
}

/// A lazily produced snapshot of a connection's schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SchemaSnapshot {
    /// Ordered table descriptors.
    pub tables: Vec<TableDescriptor>,
}

impl SchemaSnapshot {
    /// Formats the snapshot as compact text for LLM prompts.
    pub fn format_for_llm(&self) -> String {
        if self.tables.is_empty() {
            return "(no tables)".to_string();
        }
        let mut out = String::new();
        for table in &self.tables {
            out.push_str("Table: ");
            if let Some(ns) = &table.schema_namespace {
                out.push_str(ns);
                out.push('.');
            }
            out.push_str(&table.name);
            if let Some(estimate) = table.row_count_estimate {
                out.push_str(&format!(" (~{estimate} rows)"));
            }
            out.push('\n');
            for col in &table.columns {
                out.push_str(&format!(
                    "  {}: {}{}{}\n",
                    col.name,
                    col.type_string,
                    if col.primary_key { " [pk]" } else { "" },
                    if col.nullable { "" } else { " not null" },
                ));
            }
        }
        out
    }
}

/// Outcome of a cheap connectivity round-trip against a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// Whether the round-trip succeeded.
    pub success: bool,

    /// Round-trip latency in milliseconds.
    pub latency_ms: u64,

    /// Backend-reported version string, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,

    /// Diagnostic error when the round-trip failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestResult {
    /// Creates a successful test report.
    pub fn ok(latency_ms: u64, server_version: Option<String>) -> Self {
        Self {
            success: true,
            latency_ms,
            server_version,
            error: None,
        }
    }

    /// Creates a failed test report.
    pub fn fail(latency_ms: u64, error: impl Into<String>) -> Self {
        Self {
            success: false,
            latency_ms,
            server_version: None,
            error: Some(error.into()),
        }
    }
}

/// Informational query verbs a handler supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
    Aggregate,
}
