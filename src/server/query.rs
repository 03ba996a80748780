//! One-shot natural-language query endpoint.

use crate::agent::FinalPayload;
use crate::server::AppState;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    /// The natural-language question.
    pub question: String,
    /// Target connection; the active connection when omitted.
    pub connection_id: Option<String>,
}

/// POST /api/query — runs the orchestrator to completion and returns the
/// final aggregated payload (tables, per-step records, executed SQL, chart)
/// as one JSON document. No streaming.
pub async fn natural_language_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Json<FinalPayload> {
    let (tx, mut rx) = mpsc::channel(64);
    // Drain events; this endpoint only reports the aggregate.
    let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let payload = state
        .orchestrator
        .run(
            &request.question,
            request.connection_id.as_deref(),
            tx,
            CancellationToken::new(),
        )
        .await;

    let _ = drain.await;
    Json(payload)
}
