//! OpenAI-compatible chat-completions endpoint.
//!
//! Accepts `{messages, model, stream}`. With `stream = true` the response is
//! a sequence of `data: <json>` server-sent-event frames, one per
//! StreamEvent, terminated by `data: [DONE]`. Without streaming, the final
//! aggregate payload is wrapped in a single chat-completion response.

use crate::agent::StreamEvent;
use crate::llm::{Conversation, Message};
use crate::server::AppState;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
}

/// POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Response {
    let question = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
        .unwrap_or_default();
    let history = windowed_history(&request.messages);
    let model = request
        .model
        .unwrap_or_else(|| state.settings.llm_model.clone());

    if request.stream {
        stream_response(state, question, history).into_response()
    } else {
        aggregate_response(state, question, history, model)
            .await
            .into_response()
    }
}

/// Windows the prior conversation (everything before the final user turn)
/// for the direct-answer path.
fn windowed_history(messages: &[ChatMessage]) -> Vec<Message> {
    let last_user = messages.iter().rposition(|m| m.role == "user");
    let prior = match last_user {
        Some(idx) => &messages[..idx],
        None => messages,
    };
    let mut conversation = Conversation::new();
    for message in prior {
        match message.role.as_str() {
            "user" => conversation.add_user(message.content.clone()),
            "assistant" => conversation.add_assistant(message.content.clone()),
            _ => {}
        }
    }
    conversation.messages().to_vec()
}

/// Streaming variant: one SSE frame per StreamEvent.
fn stream_response(
    state: AppState,
    question: String,
    history: Vec<Message>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    // Dropping the SSE body (client disconnect) cancels the run.
    let guard = cancel.clone().drop_guard();

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator
            .run_with_history(&question, &history, None, tx, cancel)
            .await;
    });

    enum SseState {
        Open(mpsc::Receiver<StreamEvent>, DropGuard),
        Closing(DropGuard),
        Closed,
    }

    let stream = futures::stream::unfold(SseState::Open(rx, guard), |sse_state| async move {
        match sse_state {
            SseState::Open(mut rx, guard) => match rx.recv().await {
                Some(event) => {
                    let next = if matches!(event, StreamEvent::Done) {
                        SseState::Closing(guard)
                    } else {
                        SseState::Open(rx, guard)
                    };
                    let data = serde_json::to_string(&event)
                        .unwrap_or_else(|_| "{\"type\":\"error\"}".to_string());
                    Some((Ok(Event::default().data(data)), next))
                }
                // Producer went away without a done event; close the frame
                // sequence anyway.
                None => Some((Ok(Event::default().data("[DONE]")), SseState::Closed)),
            },
            SseState::Closing(_guard) => {
                Some((Ok(Event::default().data("[DONE]")), SseState::Closed))
            }
            SseState::Closed => None,
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Non-streaming variant: single chat-completion JSON document.
async fn aggregate_response(
    state: AppState,
    question: String,
    history: Vec<Message>,
    model: String,
) -> Json<serde_json::Value> {
    let (tx, mut rx) = mpsc::channel(64);
    let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let payload = state
        .orchestrator
        .run_with_history(&question, &history, None, tx, CancellationToken::new())
        .await;
    let _ = drain.await;

    let content = payload
        .answer
        .clone()
        .or_else(|| payload.error.clone())
        .unwrap_or_default();

    Json(serde_json::json!({
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop",
        }],
        "askdb": payload,
    }))
}
