//! HTTP surface tests driven through the router without a live socket.

use askdb::agent::Orchestrator;
use askdb::config::Settings;
use askdb::connection::ConnectionManager;
use askdb::llm::MockLlmClient;
use askdb::server::{router, AppState};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

fn test_state(dir: &TempDir) -> AppState {
    let manager = Arc::new(ConnectionManager::new());
    let llm = Arc::new(
        MockLlmClient::new().with_response("hello", "Hi! Connect a data source to begin."),
    );
    let orchestrator = Arc::new(Orchestrator::new(llm, manager.clone()));
    let settings = Arc::new(Settings {
        llm_api_key: None,
        llm_model: "mock-model".to_string(),
        llm_base_url: None,
        kosis_api_key: None,
        bind_addr: "127.0.0.1:0".to_string(),
        connections_path: dir.path().join("connections.json"),
    });
    AppState {
        manager,
        orchestrator,
        settings,
    }
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_version_and_active() {
    let dir = TempDir::new().unwrap();
    let app = router(test_state(&dir));

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["active_connection"].is_null());
}

#[tokio::test]
async fn kinds_endpoint_lists_field_schemas() {
    let dir = TempDir::new().unwrap();
    let app = router(test_state(&dir));

    let response = app
        .oneshot(Request::get("/api/kinds").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(response).await;

    let kinds = json["kinds"].as_array().unwrap();
    assert_eq!(kinds.len(), 9);
    let kosis = kinds.iter().find(|k| k["kind"] == "kosis_api").unwrap();
    assert_eq!(kosis["installed"], true);
    let redis = kinds.iter().find(|k| k["kind"] == "redis").unwrap();
    assert_eq!(redis["installed"], false);
}

#[tokio::test]
async fn connection_lifecycle_over_http() {
    let dir = TempDir::new().unwrap();
    let app = router(test_state(&dir));
    let db_path = dir.path().join("data.db");

    let config = serde_json::json!({
        "id": "local",
        "name": "Local file",
        "kind": "sqlite",
        "filePath": db_path.to_str().unwrap(),
        "mode": "readwritecreate",
    });

    // Create.
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/connections", config.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Duplicate id conflicts.
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/connections", config))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Activate.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/connections/local/activate",
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Execute against the active connection.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/execute",
            serde_json::json!({"query": "CREATE TABLE t (x INTEGER)"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);

    // Fast schema listing must elide columns.
    let response = app
        .clone()
        .oneshot(
            Request::get("/api/connections/local/schema?include_columns=false")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    let tables = json["schema"]["tables"].as_array().unwrap();
    assert_eq!(tables[0]["name"], "t");
    assert!(tables[0]["columns"].as_array().unwrap().is_empty());

    // Delete; deleting again stays a success (idempotent remove).
    let response = app
        .clone()
        .oneshot(
            Request::delete("/api/connections/local")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = app
        .oneshot(
            Request::delete("/api/connections/local")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn execute_without_active_connection_conflicts() {
    let dir = TempDir::new().unwrap();
    let app = router(test_state(&dir));

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/execute",
            serde_json::json!({"query": "SELECT 1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert_eq!(json["category"], "not_connected");
}

#[tokio::test]
async fn chat_completions_aggregate_response() {
    let dir = TempDir::new().unwrap();
    let app = router(test_state(&dir));

    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/chat/completions",
            serde_json::json!({
                "messages": [{"role": "user", "content": "hello"}],
                "stream": false,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["object"], "chat.completion");
    assert_eq!(json["model"], "mock-model");
    let content = json["choices"][0]["message"]["content"].as_str().unwrap();
    assert!(content.contains("Connect a data source"));
    assert_eq!(json["askdb"]["status"], "ok");
}

#[tokio::test]
async fn chat_completions_streams_events_and_terminates() {
    let dir = TempDir::new().unwrap();
    let app = router(test_state(&dir));

    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/chat/completions",
            serde_json::json!({
                "messages": [{"role": "user", "content": "hello"}],
                "stream": true,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(body.contains(r#"data: {"type":"start"}"#));
    assert!(body.contains(r#""type":"result""#));
    assert!(body.contains(r#"data: {"type":"done"}"#));
    assert!(body.trim_end().ends_with("data: [DONE]"));
}

#[tokio::test]
async fn natural_language_query_returns_aggregate() {
    let dir = TempDir::new().unwrap();
    let app = router(test_state(&dir));

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/query",
            serde_json::json!({"question": "hello"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["answer"].as_str().unwrap().contains("Connect a data source"));
}
