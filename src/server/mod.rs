//! HTTP transport layer.
//!
//! Maps the core onto the external interfaces: an OpenAI-compatible
//! chat-completions endpoint with SSE streaming, REST connection management,
//! and the one-shot natural-language query endpoint. The transport converts
//! typed StreamEvents into frames; it adds no semantics of its own.

mod chat;
mod connections;
mod query;

use crate::agent::Orchestrator;
use crate::config::Settings;
use crate::connection::ConnectionManager;
use crate::error::AskdbError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ConnectionManager>,
    pub orchestrator: Arc<Orchestrator>,
    pub settings: Arc<Settings>,
}

/// Builds the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(connections::health))
        .route("/api/kinds", get(connections::list_kinds))
        .route(
            "/api/connections",
            get(connections::list).post(connections::create),
        )
        .route("/api/connections/test", post(connections::test))
        .route(
            "/api/connections/:id",
            put(connections::update).delete(connections::remove),
        )
        .route("/api/connections/:id/activate", post(connections::activate))
        .route("/api/connections/:id/schema", get(connections::schema))
        .route("/api/execute", post(connections::execute))
        .route("/api/query", post(query::natural_language_query))
        .route("/v1/chat/completions", post(chat::chat_completions))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Error wrapper mapping the taxonomy onto HTTP statuses.
pub struct ApiError(pub AskdbError);

impl From<AskdbError> for ApiError {
    fn from(e: AskdbError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AskdbError::NotFound(_) => StatusCode::NOT_FOUND,
            AskdbError::DuplicateId(_) => StatusCode::CONFLICT,
            AskdbError::ConfigInvalid(_)
            | AskdbError::UnsupportedKind(_)
            | AskdbError::PlanInvalid(_) => StatusCode::BAD_REQUEST,
            AskdbError::NotConnected(_) => StatusCode::CONFLICT,
            AskdbError::ConnectFailed(_) => StatusCode::BAD_GATEWAY,
            AskdbError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AskdbError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({
            "error": self.0.to_string(),
            "category": self.0.category(),
        }));
        (status, body).into_response()
    }
}
