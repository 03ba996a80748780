//! Mock data handlers for testing.
//!
//! Provide deterministic results without a live backend, plus a failing
//! variant for error-path tests.

use crate::error::{AskdbError, Result};
use crate::handler::types::{
    ColumnDescriptor, QueryResult, SchemaSnapshot, TableDescriptor, TestResult, Value,
};
use crate::handler::{DataHandler, Operation};
use async_trait::async_trait;
use std::sync::Mutex;

/// Mock handler returning canned tabular results.
///
/// Records every executed query so tests can assert on handler traffic.
#[derive(Debug, Default)]
pub struct MockHandler {
    /// Pattern → result mappings checked in insertion order.
    responses: Vec<(String, QueryResult)>,
    /// Queries seen by `execute`, in order.
    executed: Mutex<Vec<String>>,
    /// Schema returned by `schema`.
    snapshot: SchemaSnapshot,
}

impl MockHandler {
    /// Creates a mock with a small users/orders schema.
    pub fn new() -> Self {
        Self {
            responses: Vec::new(),
            executed: Mutex::new(Vec::new()),
            snapshot: SchemaSnapshot {
                tables: vec![
                    TableDescriptor {
                        name: "users".to_string(),
                        schema_namespace: None,
                        columns: vec![
                            ColumnDescriptor::new("id", "integer")
                                .nullable(false)
                                .primary_key(true),
                            ColumnDescriptor::new("name", "text"),
                            ColumnDescriptor::new("created_at", "text"),
                        ],
                        row_count_estimate: Some(3),
                    },
                    TableDescriptor {
                        name: "orders".to_string(),
                        schema_namespace: None,
                        columns: vec![
                            ColumnDescriptor::new("id", "integer")
                                .nullable(false)
                                .primary_key(true),
                            ColumnDescriptor::new("user_id", "integer"),
                            ColumnDescriptor::new("total", "real"),
                        ],
                        row_count_estimate: Some(5),
                    },
                ],
            },
        }
    }

    /// Replaces the canned schema.
    pub fn with_schema(mut self, snapshot: SchemaSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Adds a pattern → result mapping. When an executed query contains
    /// `pattern`, the mock returns `result`.
    pub fn with_result(mut self, pattern: impl Into<String>, result: QueryResult) -> Self {
        self.responses.push((pattern.into(), result));
        self
    }

    /// Returns the queries `execute` has seen.
    pub fn executed_queries(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataHandler for MockHandler {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn test(&self) -> TestResult {
        TestResult::ok(1, Some("mock 1.0".to_string()))
    }

    async fn schema(&self, include_columns: bool) -> Result<SchemaSnapshot> {
        if include_columns {
            Ok(self.snapshot.clone())
        } else {
            Ok(SchemaSnapshot {
                tables: self
                    .snapshot
                    .tables
                    .iter()
                    .map(|t| TableDescriptor {
                        name: t.name.clone(),
                        schema_namespace: t.schema_namespace.clone(),
                        columns: Vec::new(),
                        row_count_estimate: t.row_count_estimate,
                    })
                    .collect(),
            })
        }
    }

    async fn execute(&self, query: &str, _params: Option<&serde_json::Value>) -> QueryResult {
        self.executed.lock().unwrap().push(query.to_string());

        for (pattern, result) in &self.responses {
            if query.contains(pattern.as_str()) {
                return result.clone();
            }
        }

        // Default canned result: a small users table.
        QueryResult::ok(
            vec!["id".to_string(), "name".to_string()],
            vec![
                vec![Value::Int(1), Value::Text("Alice".to_string())],
                vec![Value::Int(2), Value::Text("Bob".to_string())],
                vec![Value::Int(3), Value::Text("Carol".to_string())],
            ],
        )
    }

    fn supported_operations(&self) -> &'static [Operation] {
        &[Operation::Select, Operation::Aggregate]
    }
}

/// Handler whose operations always fail; for error-path tests.
#[derive(Debug, Default)]
pub struct FailingHandler {
    /// Error string returned from `execute`.
    pub message: String,
}

impl FailingHandler {
    /// Creates a failing handler with the given execute error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl DataHandler for FailingHandler {
    async fn connect(&self) -> Result<()> {
        Err(AskdbError::connect_failed("mock backend unreachable"))
    }

    async fn disconnect(&self) {}

    async fn test(&self) -> TestResult {
        TestResult::fail(1, "mock backend unreachable")
    }

    async fn schema(&self, _include_columns: bool) -> Result<SchemaSnapshot> {
        Err(AskdbError::query_failed("mock schema failure"))
    }

    async fn execute(&self, _query: &str, _params: Option<&serde_json::Value>) -> QueryResult {
        QueryResult::fail(self.message.clone())
    }

    fn supported_operations(&self) -> &'static [Operation] {
        &[Operation::Select]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_default_result() {
        let handler = MockHandler::new();
        let result = handler.execute("SELECT * FROM users", None).await;
        assert!(result.success);
        assert_eq!(result.row_count, 3);
        assert_eq!(handler.executed_queries(), vec!["SELECT * FROM users"]);
    }

    #[tokio::test]
    async fn test_mock_pattern_response() {
        let canned = QueryResult::ok(
            vec!["count".to_string()],
            vec![vec![Value::Int(42)]],
        );
        let handler = MockHandler::new().with_result("COUNT(*)", canned);
        let result = handler.execute("SELECT COUNT(*) FROM users", None).await;
        assert_eq!(result.rows[0][0], Value::Int(42));
    }

    #[tokio::test]
    async fn test_mock_fast_schema_elides_columns() {
        let handler = MockHandler::new();
        let fast = handler.schema(false).await.unwrap();
        assert!(fast.tables.iter().all(|t| t.columns.is_empty()));
        let full = handler.schema(true).await.unwrap();
        assert!(full.tables.iter().any(|t| !t.columns.is_empty()));
    }

    #[tokio::test]
    async fn test_failing_handler() {
        let handler = FailingHandler::new("boom");
        assert!(handler.connect().await.is_err());
        let result = handler.execute("SELECT 1", None).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("boom"));
    }
}
