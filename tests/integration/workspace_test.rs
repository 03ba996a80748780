//! Workspace behaviour across handler result shapes.

use askdb::handler::{QueryResult, Value};
use askdb::workspace::{ChartKind, Workspace};
use pretty_assertions::assert_eq;

// Results with document-store shapes (dotted columns, null fill) register
// and query cleanly.
#[tokio::test]
async fn dotted_document_columns_are_queryable() {
    let mut ws = Workspace::new().await.unwrap();
    let docs = QueryResult::ok(
        vec![
            "name".to_string(),
            "location.lat".to_string(),
            "location.lng".to_string(),
        ],
        vec![
            vec![
                Value::Text("seoul".into()),
                Value::Float(37.57),
                Value::Float(126.98),
            ],
            vec![Value::Text("busan".into()), Value::Float(35.18), Value::Null],
        ],
    );
    ws.register("step1_execute_mongo_query", &docs).await.unwrap();

    let result = ws
        .sql("SELECT name, \"location.lat\" AS lat FROM step1_execute_mongo_query ORDER BY name")
        .await
        .unwrap();
    assert_eq!(result.columns, vec!["name", "lat"]);
    assert_eq!(result.rows[0][0], Value::Text("busan".into()));
}

// Registering the union shape twice under two proposed names keeps both
// tables addressable.
#[tokio::test]
async fn suffixed_tables_remain_independently_addressable() {
    let mut ws = Workspace::new().await.unwrap();
    let one = QueryResult::ok(vec!["v".to_string()], vec![vec![Value::Int(1)]]);
    let two = QueryResult::ok(vec!["v".to_string()], vec![vec![Value::Int(2)]]);

    let a = ws.register("Fetch!", &one).await.unwrap();
    let b = ws.register("fetch_", &two).await.unwrap();
    assert_ne!(a, b);

    let left = ws.sql(&format!("SELECT v FROM {a}")).await.unwrap();
    let right = ws.sql(&format!("SELECT v FROM {b}")).await.unwrap();
    assert_eq!(left.rows[0][0], Value::Int(1));
    assert_eq!(right.rows[0][0], Value::Int(2));
}

// Chartify end-to-end over a registered table.
#[tokio::test]
async fn chartify_registered_table() {
    let mut ws = Workspace::new().await.unwrap();
    let series = QueryResult::ok(
        vec!["year".to_string(), "value".to_string()],
        vec![
            vec![Value::Text("2020".into()), Value::Float(10.0)],
            vec![Value::Text("2021".into()), Value::Float(12.5)],
            vec![Value::Text("2022".into()), Value::Float(11.0)],
        ],
    );
    ws.register("step1_fetch_kosis_data", &series).await.unwrap();

    let chart = ws.chartify("step1_fetch_kosis_data", "").await.unwrap();
    assert_eq!(chart.chart_kind, ChartKind::Line);
    assert_eq!(chart.labels.len(), 3);
    assert_eq!(chart.datasets[0].values, vec![10.0, 12.5, 11.0]);
}

// Chartify against a missing table is a workspace error.
#[tokio::test]
async fn chartify_missing_table_fails() {
    let ws = Workspace::new().await.unwrap();
    assert!(ws.chartify("ghost", "bar").await.is_err());
}

// Two workspaces never see each other's tables.
#[tokio::test]
async fn separate_workspaces_are_isolated() {
    let mut first = Workspace::new().await.unwrap();
    let second = Workspace::new().await.unwrap();

    let data = QueryResult::ok(vec!["x".to_string()], vec![vec![Value::Int(1)]]);
    first.register("shared_name", &data).await.unwrap();

    assert!(second.sql("SELECT * FROM shared_name").await.is_err());
}
