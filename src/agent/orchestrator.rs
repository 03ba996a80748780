//! Plan–execute–reflect orchestrator.
//!
//! Drives one request through the state machine: route the utterance, ask
//! the LLM for a plan, execute steps sequentially against the handlers and
//! the workspace, and on failure re-plan with the full history, up to a
//! bounded number of iterations. Every transition is emitted as a typed
//! StreamEvent, in order; `done` is emitted exactly once, last.

use crate::agent::events::{
    FinalPayload, StepKind, StepRecord, StepStatus, StreamEvent, TableRecord,
};
use crate::agent::plan::{decode_and_validate, Plan, Step, StepAction};
use crate::agent::router::{classify, Route};
use crate::agent::tools::{self, ToolSpec};
use crate::connection::{ConnectionConfig, ConnectionManager};
use crate::error::{AskdbError, Result};
use crate::handler::{BackendKind, DataHandler, KosisHandler, QueryResult};
use crate::llm::{
    extract_json_payload, extract_sql, prompt, LlmClient, Message, LLM_CALL_TIMEOUT_SECS,
};
use crate::workspace::Workspace;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default reflection budget: the maximum number of plans per request.
pub const DEFAULT_BUDGET: usize = 3;

/// Rows of the last result included in the final payload.
const PAYLOAD_ROW_CAP: usize = 100;

/// The orchestrator. Shared across requests; each `run` call drives one
/// request with its own workspace.
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    manager: Arc<ConnectionManager>,
    kosis_api_key: Option<String>,
    budget: usize,
}

/// Per-request execution context.
struct RunState {
    workspace: Workspace,
    payload: FinalPayload,
    /// Rows of the most recently produced result.
    last_rows: Vec<serde_json::Value>,
    /// Formatted history of prior attempts, for reflection prompts.
    history: Vec<String>,
}

impl Orchestrator {
    /// Creates an orchestrator with the default budget.
    pub fn new(llm: Arc<dyn LlmClient>, manager: Arc<ConnectionManager>) -> Self {
        Self {
            llm,
            manager,
            kosis_api_key: None,
            budget: DEFAULT_BUDGET,
        }
    }

    /// Overrides the reflection budget.
    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget.max(1);
        self
    }

    /// Enables the static `fetch_kosis_data` tool.
    pub fn with_kosis_api_key(mut self, api_key: Option<String>) -> Self {
        self.kosis_api_key = api_key;
        self
    }

    /// Runs one request, emitting events into `events` and returning the
    /// final aggregate payload. Cancellation produces exactly one trailing
    /// `error{"cancelled"}` followed by `done`.
    pub async fn run(
        &self,
        question: &str,
        connection_id: Option<&str>,
        events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> FinalPayload {
        self.run_with_history(question, &[], connection_id, events, cancel)
            .await
    }

    /// Like `run`, with prior conversation messages for the direct-answer
    /// path. The plan loop ignores the history; it plans from the question.
    pub async fn run_with_history(
        &self,
        question: &str,
        history: &[Message],
        connection_id: Option<&str>,
        events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> FinalPayload {
        emit(&events, StreamEvent::Start).await;

        let payload = match self
            .drive(question, history, connection_id, &events, &cancel)
            .await
        {
            Ok(payload) => {
                emit(
                    &events,
                    StreamEvent::Result {
                        payload: payload.clone(),
                    },
                )
                .await;
                payload
            }
            Err((error, payload)) => {
                emit(
                    &events,
                    StreamEvent::Error {
                        message: error.to_string(),
                    },
                )
                .await;
                payload
            }
        };

        emit(&events, StreamEvent::Done).await;
        payload
    }

    /// Routing, planning and execution; the workspace lives and dies here.
    async fn drive(
        &self,
        question: &str,
        history: &[Message],
        connection_id: Option<&str>,
        events: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> std::result::Result<FinalPayload, (AskdbError, FinalPayload)> {
        if classify(question) == Route::General {
            debug!("utterance routed as general");
            let messages = prompt::build_general_messages(history, question);
            return match self.llm_call(cancel, messages).await {
                Ok(answer) => {
                    let mut payload = FinalPayload::ok();
                    payload.answer = Some(answer);
                    Ok(payload)
                }
                Err(e) => {
                    let message = e_string(&e);
                    Err((e, error_payload(&message)))
                }
            };
        }

        let workspace = match Workspace::new().await {
            Ok(ws) => ws,
            Err(e) => return Err((e_clone(&e), error_payload(&e_string(&e)))),
        };
        let mut state = RunState {
            workspace,
            payload: FinalPayload::ok(),
            last_rows: Vec::new(),
            history: Vec::new(),
        };

        // Resolve the active connection; planning proceeds without one.
        let handler = match connection_id {
            Some(id) => match self.manager.handler(Some(id)).await {
                Ok((id, handler)) => Some((id, handler)),
                Err(e) => return Err((e_clone(&e), error_payload(&e_string(&e)))),
            },
            None => self.manager.handler(None).await.ok(),
        };
        let mut kind = None;
        let mut schema_text = "none".to_string();
        let mut tool_specs: Vec<ToolSpec> = Vec::new();

        if let Some((id, handler)) = &handler {
            let config = self
                .manager
                .config(id)
                .await
                .map_err(|e| (e_clone(&e), error_payload(&e_string(&e))))?;
            kind = Some(config.kind);
            schema_text = match guarded(cancel, handler.schema(true)).await {
                Ok(Ok(snapshot)) => snapshot.format_for_llm(),
                Ok(Err(e)) => {
                    warn!(error = %e, "schema introspection failed; planning without it");
                    "(schema unavailable)".to_string()
                }
                Err(e) => return Err((e, cancelled_payload(&state))),
            };
            tool_specs = self.build_handler_tools(&config, handler.as_ref());
        }
        if self.kosis_api_key.is_some() {
            tool_specs.push(tools::fetch_kosis_data_tool());
        }
        let tools_text = tools::format_for_llm(&tool_specs);

        for attempt in 1..=self.budget {
            debug!(attempt, budget = self.budget, "planning");
            let workspace_text = state
                .workspace
                .describe_for_llm()
                .await
                .unwrap_or_else(|_| "(no tables yet)".to_string());

            let messages = if state.history.is_empty() {
                prompt::build_plan_messages(question, &schema_text, &tools_text, &workspace_text)
            } else {
                prompt::build_reflection_messages(
                    question,
                    &schema_text,
                    &tools_text,
                    &workspace_text,
                    &state.history.join("\n"),
                )
            };

            let plan = match self.plan_once(cancel, messages, &tool_specs, &state).await {
                Ok(plan) => plan,
                Err(AskdbError::Cancelled) => {
                    return Err((AskdbError::Cancelled, cancelled_payload(&state)))
                }
                Err(e) => {
                    state
                        .history
                        .push(format!("plan attempt {attempt} was rejected: {e}"));
                    continue;
                }
            };

            emit(
                events,
                StreamEvent::Planning {
                    steps: plan.summaries(),
                },
            )
            .await;

            match self
                .execute_plan(&plan, handler.as_deref_pair(), kind, events, cancel, &mut state)
                .await
            {
                Ok(()) => {
                    info!(attempt, "plan completed");
                    return Ok(self.finalize(&mut state).await);
                }
                Err(AskdbError::Cancelled) => {
                    return Err((AskdbError::Cancelled, cancelled_payload(&state)))
                }
                Err(e) => {
                    state
                        .history
                        .push(format!("plan attempt {attempt} failed during execution: {e}"));
                }
            }
        }

        let error = AskdbError::BudgetExhausted(format!(
            "no successful plan after {} attempts; {}",
            self.budget,
            state.history.last().cloned().unwrap_or_default()
        ));
        let mut payload = self.finalize(&mut state).await;
        payload.status = "error".to_string();
        payload.answer = None;
        payload.error = Some(error.to_string());
        Err((error, payload))
    }

    /// One planning call: LLM → JSON payload → validated plan.
    async fn plan_once(
        &self,
        cancel: &CancellationToken,
        messages: Vec<Message>,
        tool_specs: &[ToolSpec],
        state: &RunState,
    ) -> Result<Plan> {
        let response = self.llm_call(cancel, messages).await?;
        let payload = extract_json_payload(&response)
            .ok_or_else(|| AskdbError::plan_invalid("response contained no JSON plan"))?;
        decode_and_validate(payload, tool_specs, &state.workspace.table_names())
    }

    /// Executes a validated plan step by step, strictly in order.
    async fn execute_plan(
        &self,
        plan: &Plan,
        handler: Option<(&str, &Arc<dyn DataHandler>)>,
        kind: Option<BackendKind>,
        events: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> Result<()> {
        for step in &plan.steps {
            emit(
                events,
                StreamEvent::StepStarted {
                    index: step.index,
                    kind: step.kind(),
                    description: step.description.clone(),
                },
            )
            .await;

            match &step.action {
                StepAction::ToolCall {
                    tool_name,
                    arguments,
                } => {
                    self.run_tool_step(step, tool_name, arguments, handler, kind, events, cancel, state)
                        .await?
                }
                StepAction::Query { sql, question } => {
                    self.run_query_step(step, sql.as_deref(), question.as_deref(), events, cancel, state)
                        .await?
                }
                StepAction::Visualization { table, hint } => {
                    self.run_visualization_step(step, table, hint, events, state)
                        .await?
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_tool_step(
        &self,
        step: &Step,
        tool_name: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
        handler: Option<(&str, &Arc<dyn DataHandler>)>,
        kind: Option<BackendKind>,
        events: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> Result<()> {
        let result = match self
            .invoke_tool(tool_name, arguments, handler, kind, cancel, state)
            .await
        {
            Ok(result) => result,
            Err(AskdbError::Cancelled) => return Err(AskdbError::Cancelled),
            Err(e) => {
                let message = e.to_string();
                emit(
                    events,
                    StreamEvent::ToolCall {
                        tool_name: tool_name.to_string(),
                        status: StepStatus::Error,
                        data: Some(serde_json::json!({"error": message})),
                    },
                )
                .await;
                state.payload.steps.push(failed_record(step, &message));
                return Err(e);
            }
        };

        if !result.success {
            let message = result
                .error
                .unwrap_or_else(|| "tool returned no error detail".to_string());
            emit(
                events,
                StreamEvent::ToolCall {
                    tool_name: tool_name.to_string(),
                    status: StepStatus::Error,
                    data: Some(serde_json::json!({"error": message})),
                },
            )
            .await;
            state.payload.steps.push(failed_record(step, &message));
            return Err(AskdbError::query_failed(message));
        }

        let table = state
            .workspace
            .register(&format!("step{}_{}", step.index, tool_name), &result)
            .await?;
        let mut data = serde_json::json!({
            "table_name": table,
            "row_count": result.row_count,
        });
        if let Some(query) = arguments.get("query") {
            data["query"] = query.clone();
        }
        emit(
            events,
            StreamEvent::ToolCall {
                tool_name: tool_name.to_string(),
                status: StepStatus::Completed,
                data: Some(data),
            },
        )
        .await;

        state.last_rows = result.row_objects();
        state.payload.steps.push(StepRecord {
            index: step.index,
            kind: StepKind::ToolCall,
            description: step.description.clone(),
            status: StepStatus::Completed,
            table: Some(table),
            row_count: Some(result.row_count),
            sql: arguments
                .get("query")
                .and_then(|v| v.as_str())
                .map(String::from),
            error: None,
        });
        Ok(())
    }

    /// Dispatches one tool invocation. Handler-backed tools go through the
    /// active connection; statically registered tools run directly.
    async fn invoke_tool(
        &self,
        tool_name: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
        handler: Option<(&str, &Arc<dyn DataHandler>)>,
        kind: Option<BackendKind>,
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> Result<QueryResult> {
        match tool_name {
            "fetch_kosis_data" => {
                let api_key = self.kosis_api_key.clone().ok_or_else(|| {
                    AskdbError::ToolCallFailed("no KOSIS API key configured".to_string())
                })?;
                let config = ConnectionConfig::new("kosis-static", "kosis", BackendKind::KosisApi)
                    .with_option("api_key", api_key);
                let kosis = KosisHandler::new(config)?;
                let args = stringify_arguments(arguments);
                guarded(cancel, kosis.fetch("statistics_data", &args)).await
            }
            "execute_sql" => {
                let (_, handler) = handler
                    .ok_or_else(|| AskdbError::not_connected("no active connection"))?;
                let query = arguments
                    .get("query")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        AskdbError::plan_invalid("execute_sql needs a 'query' argument")
                    })?;
                state.payload.executed_sql.push(query.to_string());
                guarded(cancel, handler.execute(query, None)).await
            }
            "execute_mongo_query" => {
                let (_, handler) = handler
                    .ok_or_else(|| AskdbError::not_connected("no active connection"))?;
                let query = serde_json::Value::Object(arguments.clone()).to_string();
                guarded(cancel, handler.execute(&query, None)).await
            }
            name => {
                // Virtual-table tools are named query_<table> on API kinds.
                let table = name.strip_prefix("query_").ok_or_else(|| {
                    AskdbError::ToolCallFailed(format!("unknown tool '{name}'"))
                })?;
                if !matches!(kind, Some(BackendKind::KosisApi | BackendKind::ExternalApi)) {
                    return Err(AskdbError::ToolCallFailed(format!(
                        "tool '{name}' needs an active API connection"
                    )));
                }
                let (_, handler) = handler
                    .ok_or_else(|| AskdbError::not_connected("no active connection"))?;
                let sql = virtual_table_sql(table, arguments);
                state.payload.executed_sql.push(sql.clone());
                guarded(cancel, handler.execute(&sql, None)).await
            }
        }
    }

    async fn run_query_step(
        &self,
        step: &Step,
        sql: Option<&str>,
        question: Option<&str>,
        events: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> Result<()> {
        // Inline SQL wins; otherwise ask the LLM given the workspace shape.
        let sql = match sql {
            Some(sql) => sql.to_string(),
            None => {
                let workspace_text = state.workspace.describe_for_llm().await?;
                let messages = prompt::build_sql_messages(
                    &workspace_text,
                    question.unwrap_or("answer the user's question"),
                );
                let response = self.llm_call(cancel, messages).await?;
                extract_sql(&response).ok_or_else(|| {
                    AskdbError::llm("SQL generation returned no SQL statement")
                })?
            }
        };

        state.payload.executed_sql.push(sql.clone());
        match state.workspace.sql(&sql).await {
            Ok(result) => {
                let table = state
                    .workspace
                    .register(&format!("step{}_query", step.index), &result)
                    .await?;
                emit(
                    events,
                    StreamEvent::Query {
                        sql: sql.clone(),
                        status: StepStatus::Completed,
                        data: Some(serde_json::json!({
                            "table_name": table,
                            "row_count": result.row_count,
                        })),
                    },
                )
                .await;
                state.last_rows = result.row_objects();
                state.payload.steps.push(StepRecord {
                    index: step.index,
                    kind: StepKind::Query,
                    description: step.description.clone(),
                    status: StepStatus::Completed,
                    table: Some(table),
                    row_count: Some(result.row_count),
                    sql: Some(sql),
                    error: None,
                });
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                emit(
                    events,
                    StreamEvent::Query {
                        sql: sql.clone(),
                        status: StepStatus::Error,
                        data: Some(serde_json::json!({"error": message})),
                    },
                )
                .await;
                let mut record = failed_record(step, &message);
                record.sql = Some(sql);
                state.payload.steps.push(record);
                Err(e)
            }
        }
    }

    async fn run_visualization_step(
        &self,
        step: &Step,
        table: &str,
        hint: &str,
        events: &mpsc::Sender<StreamEvent>,
        state: &mut RunState,
    ) -> Result<()> {
        match state.workspace.chartify(table, hint).await {
            Ok(chart) => {
                emit(
                    events,
                    StreamEvent::Visualization {
                        chart_data: chart.clone(),
                    },
                )
                .await;
                state.payload.chart = Some(chart);
                state.payload.steps.push(StepRecord {
                    index: step.index,
                    kind: StepKind::Visualization,
                    description: step.description.clone(),
                    status: StepStatus::Completed,
                    table: Some(table.to_string()),
                    row_count: None,
                    sql: None,
                    error: None,
                });
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                emit(
                    events,
                    StreamEvent::ToolCall {
                        tool_name: "chartify".to_string(),
                        status: StepStatus::Error,
                        data: Some(serde_json::json!({"error": message})),
                    },
                )
                .await;
                state.payload.steps.push(failed_record(step, &message));
                Err(e)
            }
        }
    }

    /// Builds the final payload from the workspace state.
    async fn finalize(&self, state: &mut RunState) -> FinalPayload {
        let mut payload = std::mem::take(&mut state.payload);
        if let Ok(summary) = state.workspace.describe().await {
            payload.tables = summary
                .into_iter()
                .map(|(name, table)| TableRecord {
                    name,
                    row_count: table.row_count,
                })
                .collect();
        }
        payload.rows = std::mem::take(&mut state.last_rows);
        payload.rows.truncate(PAYLOAD_ROW_CAP);
        if payload.status == "ok" && payload.answer.is_none() {
            payload.answer = Some(match payload.rows.len() {
                0 => "The plan completed but produced no rows.".to_string(),
                1 => format!("Result: {}", payload.rows[0]),
                n => format!("Produced {n} rows across {} tables.", payload.tables.len()),
            });
        }
        payload
    }

    /// One LLM call with the orchestrator timeout cap and cancellation.
    async fn llm_call(&self, cancel: &CancellationToken, messages: Vec<Message>) -> Result<String> {
        let call = async {
            tokio::time::timeout(
                Duration::from_secs(LLM_CALL_TIMEOUT_SECS),
                self.llm.complete(&messages),
            )
            .await
            .map_err(|_| {
                AskdbError::timeout(format!("LLM call exceeded {LLM_CALL_TIMEOUT_SECS} s"))
            })?
        };
        guarded(cancel, call).await?
    }

    /// Builds the handler-backed tool list for the active connection.
    fn build_handler_tools(
        &self,
        config: &ConnectionConfig,
        handler: &dyn DataHandler,
    ) -> Vec<ToolSpec> {
        let virtual_tables = match config.kind {
            BackendKind::KosisApi => KosisHandler::new(config.clone())
                .map(|h| h.virtual_tables().to_vec())
                .unwrap_or_default(),
            BackendKind::ExternalApi => crate::handler::ExternalApiHandler::new(config.clone())
                .map(|h| h.virtual_tables().to_vec())
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        tools::handler_tools(config.kind, handler.supported_operations(), &virtual_tables)
    }
}

/// Runs a future unless the token is cancelled first.
async fn guarded<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AskdbError::Cancelled),
        value = fut => Ok(value),
    }
}

async fn emit(events: &mpsc::Sender<StreamEvent>, event: StreamEvent) {
    debug!(event = event.kind(), "emit");
    // A dropped receiver means the caller went away; keep driving so the
    // run's side effects stay consistent.
    let _ = events.send(event).await;
}

fn failed_record(step: &Step, message: &str) -> StepRecord {
    StepRecord {
        index: step.index,
        kind: step.kind(),
        description: step.description.clone(),
        status: StepStatus::Error,
        table: None,
        row_count: None,
        sql: None,
        error: Some(message.to_string()),
    }
}

fn error_payload(message: &str) -> FinalPayload {
    FinalPayload::error(message)
}

fn cancelled_payload(state: &RunState) -> FinalPayload {
    let mut payload = FinalPayload::error("cancelled");
    payload.steps = state.payload.steps.clone();
    payload.executed_sql = state.payload.executed_sql.clone();
    payload
}

fn e_string(e: &AskdbError) -> String {
    e.to_string()
}

fn e_clone(e: &AskdbError) -> AskdbError {
    // AskdbError is not Clone (sources vary); rebuild from the display text
    // preserving the category where it matters downstream.
    match e {
        AskdbError::Cancelled => AskdbError::Cancelled,
        AskdbError::NotConnected(s) => AskdbError::NotConnected(s.clone()),
        AskdbError::NotFound(s) => AskdbError::NotFound(s.clone()),
        other => AskdbError::Internal(other.to_string()),
    }
}

/// Renders equality arguments into the SQL-like virtual-table query shape.
fn virtual_table_sql(
    table: &str,
    arguments: &serde_json::Map<String, serde_json::Value>,
) -> String {
    let args = stringify_arguments(arguments);
    if args.is_empty() {
        return format!("SELECT * FROM {table}");
    }
    let predicates: Vec<String> = args
        .iter()
        .map(|(k, v)| format!("{k} = '{}'", v.replace('\'', "''")))
        .collect();
    format!("SELECT * FROM {table} WHERE {}", predicates.join(" AND "))
}

fn stringify_arguments(
    arguments: &serde_json::Map<String, serde_json::Value>,
) -> BTreeMap<String, String> {
    arguments
        .iter()
        .filter_map(|(k, v)| {
            let text = match v {
                serde_json::Value::Null => return None,
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((k.clone(), text))
        })
        .collect()
}

/// Helper to borrow the optional handler pair by reference.
trait AsDerefPair {
    fn as_deref_pair(&self) -> Option<(&str, &Arc<dyn DataHandler>)>;
}

impl AsDerefPair for Option<(String, Arc<dyn DataHandler>)> {
    fn as_deref_pair(&self) -> Option<(&str, &Arc<dyn DataHandler>)> {
        self.as_ref().map(|(id, handler)| (id.as_str(), handler))
    }
}
