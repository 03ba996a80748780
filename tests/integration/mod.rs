//! Shared helpers for the integration suites.

mod manager_test;
mod orchestrator_test;
mod server_test;
mod workspace_test;

use askdb::agent::{FinalPayload, Orchestrator, StreamEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Runs one request and collects the emitted event stream alongside the
/// final payload.
pub async fn run_and_collect(
    orchestrator: &Orchestrator,
    question: &str,
    cancel: CancellationToken,
) -> (FinalPayload, Vec<StreamEvent>) {
    let (tx, mut rx) = mpsc::channel(64);
    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    });

    let payload = orchestrator.run(question, None, tx, cancel).await;
    let events = collector.await.expect("collector task");
    (payload, events)
}

/// Asserts the trace invariant: `done` appears exactly once and is last, and
/// the terminal pair is either result+done or error+done.
pub fn assert_valid_trace(events: &[StreamEvent]) {
    assert!(!events.is_empty(), "no events emitted");
    let done_count = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Done))
        .count();
    assert_eq!(done_count, 1, "done must be emitted exactly once");
    assert!(
        matches!(events.last(), Some(StreamEvent::Done)),
        "done must be last"
    );
    assert!(
        matches!(
            events.get(events.len() - 2),
            Some(StreamEvent::Result { .. }) | Some(StreamEvent::Error { .. })
        ),
        "the event before done must be result or error"
    );
    assert!(
        matches!(events.first(), Some(StreamEvent::Start)),
        "the stream must open with start"
    );
}
