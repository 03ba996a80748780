//! Typed streaming events emitted to the caller.
//!
//! The orchestrator state machine produces these in order; the transport
//! layer maps each one onto a single server-sent-event frame.

use crate::workspace::ChartData;
use serde::{Deserialize, Serialize};

/// Step kind tag carried in events and plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ToolCall,
    Query,
    Visualization,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolCall => "tool_call",
            Self::Query => "query",
            Self::Visualization => "visualization",
        }
    }
}

/// Completion status carried in tool_call and query events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Error,
}

/// Summary of one planned step, carried in the planning event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedStep {
    pub index: usize,
    pub kind: StepKind,
    pub description: String,
}

/// Record of one executed (or failed) step in the final payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub kind: StepKind,
    pub description: String,
    pub status: StepStatus,
    /// Workspace table the step produced, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Rows in the produced table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    /// SQL the step executed, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    /// Error message for failed steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One workspace table listed in the final payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRecord {
    pub name: String,
    pub row_count: usize,
}

/// The final aggregate payload.
///
/// Partial results are preserved: every workspace table registered before a
/// failure is listed even when the run ends in an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinalPayload {
    /// "ok" or "error".
    pub status: String,
    /// Direct or summarised answer text, when one was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// Terminal error message, when the run failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Tables produced during the run.
    pub tables: Vec<TableRecord>,
    /// Per-step records, in execution order across all attempts.
    pub steps: Vec<StepRecord>,
    /// Every SQL statement executed, in order.
    pub executed_sql: Vec<String>,
    /// Rows of the last produced result, as JSON objects.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub rows: Vec<serde_json::Value>,
    /// Chart data, when a visualization step ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartData>,
}

impl FinalPayload {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// A typed message emitted to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Request accepted.
    Start,
    /// A validated plan was produced.
    Planning { steps: Vec<PlannedStep> },
    /// Step execution begins.
    StepStarted {
        index: usize,
        kind: StepKind,
        description: String,
    },
    /// A tool call finished (successfully or not).
    ToolCall {
        tool_name: String,
        status: StepStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    /// A workspace query finished; carries the executed SQL.
    Query {
        sql: String,
        status: StepStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    /// Chart data produced by a visualization step.
    Visualization { chart_data: ChartData },
    /// The final aggregate payload.
    Result {
        #[serde(rename = "final")]
        payload: FinalPayload,
    },
    /// Terminal (or cancellation) error.
    Error { message: String },
    /// End of stream; emitted exactly once, last.
    Done,
}

impl StreamEvent {
    /// Returns the wire tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Planning { .. } => "planning",
            Self::StepStarted { .. } => "step_started",
            Self::ToolCall { .. } => "tool_call",
            Self::Query { .. } => "query",
            Self::Visualization { .. } => "visualization",
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }
}
