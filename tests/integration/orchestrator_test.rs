//! End-to-end orchestrator scenarios over mock handlers and the mock LLM.

use crate::integration::{assert_valid_trace, run_and_collect};
use askdb::agent::{Orchestrator, StepStatus, StreamEvent};
use askdb::connection::{ConnectionConfig, ConnectionManager};
use askdb::error::Result;
use askdb::handler::{
    BackendKind, DataHandler, MockHandler, Operation, QueryResult, SchemaSnapshot, TestResult,
    Value,
};
use askdb::llm::MockLlmClient;
use async_trait::async_trait;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn orchestrator_with(
    llm: MockLlmClient,
    manager: Arc<ConnectionManager>,
) -> Orchestrator {
    Orchestrator::new(Arc::new(llm), manager)
}

async fn sqlite_manager(dir: &TempDir) -> Arc<ConnectionManager> {
    let manager = Arc::new(ConnectionManager::new());
    let path = dir.path().join("users.db");
    let config = ConnectionConfig::new("local", "local", BackendKind::Sqlite)
        .with_option("filePath", path.to_str().unwrap())
        .with_option("mode", "readwritecreate");
    manager.create(config).await.unwrap();
    manager.activate("local").await.unwrap();
    manager
        .execute(
            "local",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, created_at TEXT)",
            None,
        )
        .await
        .unwrap();
    manager
        .execute(
            "local",
            "INSERT INTO users (name) VALUES ('alice'), ('bob'), ('carol')",
            None,
        )
        .await
        .unwrap();
    manager
}

async fn mock_api_manager(handler: Arc<MockHandler>) -> Arc<ConnectionManager> {
    let manager = Arc::new(ConnectionManager::new());
    let config = ConnectionConfig::new("kosis", "kosis", BackendKind::KosisApi)
        .with_option("api_key", "test-key");
    manager.install(config, handler).await;
    manager
}

fn plan(steps: serde_json::Value) -> String {
    serde_json::json!({ "steps": steps }).to_string()
}

// Scenario: happy path against a SQLite file.
#[tokio::test]
async fn happy_path_sqlite_count() {
    let dir = TempDir::new().unwrap();
    let manager = sqlite_manager(&dir).await;

    let llm = MockLlmClient::new().with_script([plan(serde_json::json!([
        {"index": 1, "kind": "tool_call", "description": "count users",
         "tool_name": "execute_sql",
         "arguments": {"query": "SELECT COUNT(*) AS count FROM users"}}
    ]))]);
    let orchestrator = orchestrator_with(llm, manager);

    let (payload, events) =
        run_and_collect(&orchestrator, "how many users?", CancellationToken::new()).await;

    assert_valid_trace(&events);
    assert_eq!(payload.status, "ok");
    assert_eq!(payload.rows.len(), 1);
    assert_eq!(payload.rows[0]["count"], serde_json::json!(3));
    assert_eq!(payload.tables.len(), 1);
    assert_eq!(payload.tables[0].name, "step1_execute_sql");
    assert!(payload
        .executed_sql
        .iter()
        .any(|sql| sql.contains("COUNT(*)")));

    // start, planning, step_started, tool_call, result, done
    assert!(matches!(events[1], StreamEvent::Planning { .. }));
    assert!(matches!(events[2], StreamEvent::StepStarted { index: 1, .. }));
    match &events[3] {
        StreamEvent::ToolCall { status, .. } => assert_eq!(*status, StepStatus::Completed),
        other => panic!("expected tool_call, got {other:?}"),
    }
}

// Scenario: SQL-like query against an API virtual table; the event carries
// the same SQL text the handler received.
#[tokio::test]
async fn api_as_table_passes_sql_through() {
    let sql = "SELECT * FROM statistics_search WHERE searchNm = '인구'";
    let canned = QueryResult::ok(
        vec!["orgId".to_string(), "tblId".to_string(), "tblNm".to_string()],
        vec![vec![
            Value::Text("101".into()),
            Value::Text("DT_1B040A3".into()),
            Value::Text("인구총조사".into()),
        ]],
    );
    let handler = Arc::new(MockHandler::new().with_result("statistics_search", canned));
    let manager = mock_api_manager(handler.clone()).await;

    let llm = MockLlmClient::new().with_script([plan(serde_json::json!([
        {"index": 1, "kind": "tool_call", "description": "search population stats",
         "tool_name": "execute_sql", "arguments": {"query": sql}}
    ]))]);
    let orchestrator = orchestrator_with(llm, manager);

    let (payload, events) =
        run_and_collect(&orchestrator, "인구 통계 찾아줘", CancellationToken::new()).await;

    assert_valid_trace(&events);
    assert_eq!(payload.status, "ok");
    assert!(payload.rows.len() >= 1);

    // The handler saw exactly the SQL from the plan.
    assert_eq!(handler.executed_queries(), vec![sql.to_string()]);

    // And the emitted event carries the same SQL text.
    let tool_event = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::ToolCall { data: Some(data), .. } => Some(data.clone()),
            _ => None,
        })
        .expect("tool_call event with data");
    assert_eq!(tool_event["query"], serde_json::json!(sql));
}

// Scenario: cross-source join inside the workspace.
#[tokio::test]
async fn cross_source_join_computes_per_capita() {
    let gdp = QueryResult::ok(
        vec!["year".to_string(), "g".to_string()],
        vec![
            vec![Value::Int(2020), Value::Float(1000.0)],
            vec![Value::Int(2021), Value::Float(1100.0)],
        ],
    );
    let pop = QueryResult::ok(
        vec!["year".to_string(), "p".to_string()],
        vec![
            vec![Value::Int(2020), Value::Int(50)],
            vec![Value::Int(2021), Value::Int(50)],
            vec![Value::Int(2022), Value::Int(51)],
        ],
    );
    let handler = Arc::new(
        MockHandler::new()
            .with_result("gdp_table", gdp)
            .with_result("pop_table", pop),
    );
    let manager = mock_api_manager(handler).await;

    let llm = MockLlmClient::new().with_script([plan(serde_json::json!([
        {"index": 1, "kind": "tool_call", "description": "fetch gdp",
         "tool_name": "execute_sql", "arguments": {"query": "SELECT * FROM gdp_table"}},
        {"index": 2, "kind": "tool_call", "description": "fetch population",
         "tool_name": "execute_sql", "arguments": {"query": "SELECT * FROM pop_table"}},
        {"index": 3, "kind": "query", "description": "join and divide",
         "sql": "SELECT year, g / p AS per_capita FROM step1_execute_sql JOIN step2_execute_sql USING (year) ORDER BY year"}
    ]))]);
    let orchestrator = orchestrator_with(llm, manager);

    let (payload, events) = run_and_collect(
        &orchestrator,
        "gdp per capita by year",
        CancellationToken::new(),
    )
    .await;

    assert_valid_trace(&events);
    assert_eq!(payload.status, "ok");
    // One row per year shared between the two sources.
    assert_eq!(payload.rows.len(), 2);
    assert_eq!(payload.rows[0]["per_capita"], serde_json::json!(20.0));
    assert_eq!(payload.rows[1]["per_capita"], serde_json::json!(22.0));
    assert_eq!(payload.tables.len(), 3);
}

// Scenario: reflection recovers after a missing-parameter failure.
#[tokio::test]
async fn reflection_recovers_from_failed_step() {
    let failure = QueryResult::fail("required parameter objL1 missing");
    let success = QueryResult::ok(
        vec!["PRD_DE".to_string(), "DT".to_string()],
        vec![vec![Value::Text("2020".into()), Value::Float(3.1)]],
    );
    let handler = Arc::new(
        MockHandler::new()
            .with_result("WHERE orgId", failure)
            .with_result("objL1", success),
    );
    let manager = mock_api_manager(handler).await;

    let first_plan = plan(serde_json::json!([
        {"index": 1, "kind": "tool_call", "description": "fetch data",
         "tool_name": "execute_sql",
         "arguments": {"query": "SELECT * FROM statistics_data WHERE orgId = '101'"}}
    ]));
    let second_plan = plan(serde_json::json!([
        {"index": 1, "kind": "tool_call", "description": "fetch data with defaults",
         "tool_name": "execute_sql",
         "arguments": {"query": "SELECT * FROM statistics_data WHERE objL1 = 'ALL'"}}
    ]));
    let llm = MockLlmClient::new().with_script([first_plan, second_plan]);
    let orchestrator = orchestrator_with(llm, manager);

    let (payload, events) = run_and_collect(
        &orchestrator,
        "population statistics trend",
        CancellationToken::new(),
    )
    .await;

    assert_valid_trace(&events);
    assert_eq!(payload.status, "ok");

    // Two planning events: the original plan and the revision.
    let planning_count = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Planning { .. }))
        .count();
    assert_eq!(planning_count, 2);

    // The failing step is visible in the stream.
    assert!(events.iter().any(|e| matches!(
        e,
        StreamEvent::ToolCall { status: StepStatus::Error, .. }
    )));

    // The reflection prompt carried the failure and the workspace state.
    let failed_step = payload
        .steps
        .iter()
        .find(|s| s.status == StepStatus::Error)
        .expect("failed step recorded");
    assert!(failed_step
        .error
        .as_deref()
        .unwrap()
        .contains("objL1 missing"));
}

// Scenario: every plan fails; the budget bounds the attempts.
#[tokio::test]
async fn budget_exhausted_reports_error() {
    let handler = Arc::new(
        MockHandler::new().with_result("always_fails", QueryResult::fail("upstream 500")),
    );
    let manager = mock_api_manager(handler).await;

    let failing_plan = plan(serde_json::json!([
        {"index": 1, "kind": "tool_call", "description": "doomed",
         "tool_name": "execute_sql", "arguments": {"query": "SELECT * FROM always_fails"}}
    ]));
    let llm = MockLlmClient::new().with_script([
        failing_plan.clone(),
        failing_plan.clone(),
        failing_plan.clone(),
    ]);
    let orchestrator = orchestrator_with(llm, manager);

    let (payload, events) = run_and_collect(
        &orchestrator,
        "show me the data",
        CancellationToken::new(),
    )
    .await;

    assert_valid_trace(&events);
    assert_eq!(payload.status, "error");

    // No result{ok} was ever emitted.
    assert!(!events
        .iter()
        .any(|e| matches!(e, StreamEvent::Result { .. })));

    // The terminal error mentions the budget.
    match events.get(events.len() - 2) {
        Some(StreamEvent::Error { message }) => {
            assert!(message.to_lowercase().contains("budget"), "{message}")
        }
        other => panic!("expected terminal error, got {other:?}"),
    }

    // No more than N plans were produced.
    let planning_count = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Planning { .. }))
        .count();
    assert_eq!(planning_count, 3);
}

/// Handler whose execute blocks until cancelled.
#[derive(Debug)]
struct HangingHandler;

#[async_trait]
impl DataHandler for HangingHandler {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }
    async fn disconnect(&self) {}
    async fn test(&self) -> TestResult {
        TestResult::ok(1, None)
    }
    async fn schema(&self, _include_columns: bool) -> Result<SchemaSnapshot> {
        Ok(SchemaSnapshot::default())
    }
    async fn execute(&self, _query: &str, _params: Option<&serde_json::Value>) -> QueryResult {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        QueryResult::fail("unreachable")
    }
    fn supported_operations(&self) -> &'static [Operation] {
        &[Operation::Select]
    }
}

// Scenario: cancellation while a handler execute is in flight.
#[tokio::test]
async fn cancellation_mid_execute_emits_single_error_done() {
    let manager = Arc::new(ConnectionManager::new());
    let config = ConnectionConfig::new("slow", "slow", BackendKind::Sqlite)
        .with_option("filePath", "/tmp/unused.db");
    manager.install(config, Arc::new(HangingHandler)).await;

    let llm = MockLlmClient::new().with_script([plan(serde_json::json!([
        {"index": 1, "kind": "tool_call", "description": "slow fetch",
         "tool_name": "execute_sql", "arguments": {"query": "SELECT 1"}}
    ]))]);
    let orchestrator = orchestrator_with(llm, manager);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let (payload, events) =
        run_and_collect(&orchestrator, "count the data rows", cancel).await;

    assert_eq!(payload.status, "error");
    assert_eq!(payload.error.as_deref(), Some("cancelled"));

    // Exactly one trailing error{cancelled} followed by done.
    let n = events.len();
    match (&events[n - 2], &events[n - 1]) {
        (StreamEvent::Error { message }, StreamEvent::Done) => {
            assert_eq!(message, "cancelled")
        }
        other => panic!("expected error+done tail, got {other:?}"),
    }
    let error_count = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Error { .. }))
        .count();
    assert_eq!(error_count, 1);
}

// General utterances bypass the plan loop.
#[tokio::test]
async fn general_utterance_answered_directly() {
    let manager = Arc::new(ConnectionManager::new());
    let llm = MockLlmClient::new()
        .with_response("hello", "Hi! Ask me about your connected data sources.");
    let orchestrator = orchestrator_with(llm, manager);

    let (payload, events) =
        run_and_collect(&orchestrator, "hello there", CancellationToken::new()).await;

    assert_valid_trace(&events);
    assert_eq!(payload.status, "ok");
    assert!(payload.answer.unwrap().contains("data sources"));
    // No planning happened.
    assert!(!events
        .iter()
        .any(|e| matches!(e, StreamEvent::Planning { .. })));
}

// An unparsable plan consumes one attempt; the next attempt succeeds.
#[tokio::test]
async fn invalid_plan_is_reflectable() {
    let handler = Arc::new(MockHandler::new());
    let manager = mock_api_manager(handler).await;

    let good_plan = plan(serde_json::json!([
        {"index": 1, "kind": "tool_call", "description": "fetch",
         "tool_name": "execute_sql", "arguments": {"query": "SELECT * FROM users"}}
    ]));
    let llm = MockLlmClient::new().with_script(["this is not a plan".to_string(), good_plan]);
    let orchestrator = orchestrator_with(llm, manager);

    let (payload, events) =
        run_and_collect(&orchestrator, "show the data", CancellationToken::new()).await;

    assert_valid_trace(&events);
    assert_eq!(payload.status, "ok");
    let planning_count = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Planning { .. }))
        .count();
    assert_eq!(planning_count, 1);
}

// Visualization steps chart a produced table.
#[tokio::test]
async fn visualization_step_emits_chart() {
    let series = QueryResult::ok(
        vec!["year".to_string(), "gdp".to_string()],
        vec![
            vec![Value::Text("2020".into()), Value::Float(1.9)],
            vec![Value::Text("2021".into()), Value::Float(2.2)],
        ],
    );
    let handler = Arc::new(MockHandler::new().with_result("gdp_series", series));
    let manager = mock_api_manager(handler).await;

    let llm = MockLlmClient::new().with_script([plan(serde_json::json!([
        {"index": 1, "kind": "tool_call", "description": "fetch series",
         "tool_name": "execute_sql", "arguments": {"query": "SELECT * FROM gdp_series"}},
        {"index": 2, "kind": "visualization", "description": "chart it",
         "table": "step1_execute_sql", "hint": "line"}
    ]))]);
    let orchestrator = orchestrator_with(llm, manager);

    let (payload, events) = run_and_collect(
        &orchestrator,
        "plot gdp growth over time",
        CancellationToken::new(),
    )
    .await;

    assert_valid_trace(&events);
    assert_eq!(payload.status, "ok");
    let chart = payload.chart.expect("chart in payload");
    assert_eq!(chart.labels, vec!["2020", "2021"]);
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::Visualization { .. })));
}

// Workspace isolation: tables from one request never leak into another.
#[tokio::test]
async fn workspaces_are_isolated_between_requests() {
    let handler = Arc::new(MockHandler::new());
    let manager = mock_api_manager(handler).await;

    let first = plan(serde_json::json!([
        {"index": 1, "kind": "tool_call", "description": "fetch",
         "tool_name": "execute_sql", "arguments": {"query": "SELECT * FROM users"}}
    ]));
    // The second request references the first request's table; validation
    // must reject it because each run starts with an empty workspace.
    let second = plan(serde_json::json!([
        {"index": 1, "kind": "query", "description": "reuse",
         "sql": "SELECT * FROM step1_execute_sql"}
    ]));

    let llm = MockLlmClient::new().with_script([first, second.clone(), second.clone(), second]);
    let orchestrator = orchestrator_with(llm, manager);

    let (first_payload, _) =
        run_and_collect(&orchestrator, "show the data", CancellationToken::new()).await;
    assert_eq!(first_payload.status, "ok");

    let (second_payload, events) =
        run_and_collect(&orchestrator, "show the data again", CancellationToken::new()).await;
    assert_eq!(second_payload.status, "error");
    assert!(!events
        .iter()
        .any(|e| matches!(e, StreamEvent::Planning { .. })));
}
