//! Connection-management REST endpoints.

use crate::connection::{ConnectionConfig, ConnectionManager};
use crate::error::AskdbError;
use crate::handler::{describe_fields, supported_kinds, TestResult};
use crate::server::{ApiError, AppState};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let active = state.manager.active().await;
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_connection": active,
    }))
}

/// GET /api/kinds
pub async fn list_kinds() -> Json<serde_json::Value> {
    let kinds: Vec<serde_json::Value> = supported_kinds()
        .iter()
        .map(|kind| {
            serde_json::json!({
                "kind": kind.as_str(),
                "installed": kind.is_installed(),
                "fields": describe_fields(*kind),
            })
        })
        .collect();
    Json(serde_json::json!({ "kinds": kinds }))
}

/// GET /api/connections
pub async fn list(State(state): State<AppState>) -> Json<serde_json::Value> {
    let connections = state.manager.list().await;
    Json(serde_json::json!({ "connections": connections }))
}

/// POST /api/connections
pub async fn create(
    State(state): State<AppState>,
    Json(config): Json<ConnectionConfig>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = state.manager.create(config).await?;
    Ok(Json(serde_json::json!({ "id": id })))
}

/// POST /api/connections/test
pub async fn test(
    State(state): State<AppState>,
    Json(config): Json<ConnectionConfig>,
) -> Result<Json<TestResult>, ApiError> {
    let result = state.manager.test(&config).await?;
    Ok(Json(result))
}

/// PUT /api/connections/:id
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut config): Json<ConnectionConfig>,
) -> Result<Json<serde_json::Value>, ApiError> {
    config.id = id;
    state.manager.update(config).await?;
    Ok(Json(serde_json::json!({ "updated": true })))
}

/// DELETE /api/connections/:id
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.manager.remove(&id).await?;
    Ok(Json(serde_json::json!({ "removed": true })))
}

/// POST /api/connections/:id/activate
pub async fn activate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.manager.activate(&id).await?;
    Ok(Json(serde_json::json!({ "active": id })))
}

#[derive(Debug, Deserialize)]
pub struct SchemaParams {
    /// Skip per-column introspection when false.
    #[serde(default = "default_true")]
    pub include_columns: bool,
}

fn default_true() -> bool {
    true
}

/// GET /api/connections/:id/schema?include_columns=
pub async fn schema(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<SchemaParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = state.manager.schema(&id, params.include_columns).await?;
    Ok(Json(serde_json::json!({ "schema": snapshot })))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    /// Target connection; the active connection when omitted.
    pub connection_id: Option<String>,
    /// SQL (relational / API kinds) or a JSON query object (document kind).
    pub query: String,
    /// Optional backend-specific parameters.
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

/// POST /api/execute
pub async fn execute(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = resolve_id(&state.manager, request.connection_id).await?;
    let result = state
        .manager
        .execute(&id, &request.query, request.params.as_ref())
        .await?;
    Ok(Json(serde_json::json!({
        "connection_id": id,
        "success": result.success,
        "columns": result.columns,
        "rows": result.row_objects(),
        "row_count": result.row_count,
        "execution_time_ms": result.execution_time_ms,
        "error": result.error,
    })))
}

async fn resolve_id(
    manager: &ConnectionManager,
    requested: Option<String>,
) -> Result<String, ApiError> {
    match requested {
        Some(id) => Ok(id),
        None => manager
            .active()
            .await
            .ok_or_else(|| ApiError(AskdbError::not_connected("no active connection"))),
    }
}
