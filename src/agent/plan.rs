//! Plan decoding and validation.
//!
//! Everything the LLM returns is untrusted input: plans are decoded from the
//! extracted JSON payload and rejected against a strict schema before any
//! execution.

use crate::agent::events::{PlannedStep, StepKind};
use crate::agent::tools::ToolSpec;
use crate::error::{AskdbError, Result};
use crate::workspace::normalize_identifier;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Kind-specific payload of one step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    /// Invoke a tool with an argument mapping.
    ToolCall {
        tool_name: String,
        arguments: serde_json::Map<String, serde_json::Value>,
    },
    /// Run SQL against the workspace, either inline or generated from a
    /// natural-language sub-question.
    Query {
        sql: Option<String>,
        question: Option<String>,
    },
    /// Project a workspace table into chart data.
    Visualization { table: String, hint: String },
}

/// One validated plan step.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub index: usize,
    pub description: String,
    pub action: StepAction,
}

impl Step {
    /// Kind tag of this step.
    pub fn kind(&self) -> StepKind {
        match self.action {
            StepAction::ToolCall { .. } => StepKind::ToolCall,
            StepAction::Query { .. } => StepKind::Query,
            StepAction::Visualization { .. } => StepKind::Visualization,
        }
    }

    /// The workspace table this step will produce, when it produces one.
    pub fn produces_table(&self) -> Option<String> {
        match &self.action {
            StepAction::ToolCall { tool_name, .. } => Some(normalize_identifier(&format!(
                "step{}_{}",
                self.index, tool_name
            ))),
            StepAction::Query { .. } => Some(format!("step{}_query", self.index)),
            StepAction::Visualization { .. } => None,
        }
    }
}

/// An ordered, validated sequence of steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    /// Step summaries for the planning event.
    pub fn summaries(&self) -> Vec<PlannedStep> {
        self.steps
            .iter()
            .map(|s| PlannedStep {
                index: s.index,
                kind: s.kind(),
                description: s.description.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct PlanPayload {
    steps: Vec<StepPayload>,
}

#[derive(Debug, Deserialize)]
struct StepPayload {
    index: usize,
    kind: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    arguments: Option<serde_json::Value>,
    #[serde(default)]
    sql: Option<String>,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    hint: Option<String>,
}

fn step_table_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\bstep\d+_[a-z0-9_]+\b").expect("valid regex"))
}

/// Decodes a plan from an extracted JSON payload and validates it.
///
/// `tools` is the tool list the plan may call; `existing_tables` are the
/// workspace tables already present (from earlier attempts of this run).
pub fn decode_and_validate(
    payload: serde_json::Value,
    tools: &[ToolSpec],
    existing_tables: &BTreeSet<String>,
) -> Result<Plan> {
    let payload: PlanPayload = serde_json::from_value(payload)
        .map_err(|e| AskdbError::plan_invalid(format!("malformed plan structure: {e}")))?;

    if payload.steps.is_empty() {
        return Err(AskdbError::plan_invalid("plan has no steps"));
    }

    let mut steps = Vec::with_capacity(payload.steps.len());
    for (position, raw) in payload.steps.into_iter().enumerate() {
        if raw.index != position + 1 {
            return Err(AskdbError::plan_invalid(format!(
                "step indices must be contiguous from 1; found {} at position {}",
                raw.index,
                position + 1
            )));
        }

        let action = match raw.kind.as_str() {
            "tool_call" => {
                let tool_name = raw.tool_name.filter(|n| !n.is_empty()).ok_or_else(|| {
                    AskdbError::plan_invalid(format!("step {} is missing tool_name", raw.index))
                })?;
                let arguments = match raw.arguments {
                    None | Some(serde_json::Value::Null) => serde_json::Map::new(),
                    Some(serde_json::Value::Object(map)) => map,
                    Some(_) => {
                        return Err(AskdbError::plan_invalid(format!(
                            "step {} arguments must be an object",
                            raw.index
                        )))
                    }
                };
                StepAction::ToolCall {
                    tool_name,
                    arguments,
                }
            }
            "query" => {
                let sql = raw.sql.filter(|s| !s.trim().is_empty());
                let question = raw.question.filter(|q| !q.trim().is_empty());
                if sql.is_none() && question.is_none() {
                    return Err(AskdbError::plan_invalid(format!(
                        "query step {} needs either inline sql or a question",
                        raw.index
                    )));
                }
                StepAction::Query { sql, question }
            }
            "visualization" => {
                let table = raw.table.filter(|t| !t.is_empty()).ok_or_else(|| {
                    AskdbError::plan_invalid(format!(
                        "visualization step {} is missing its table",
                        raw.index
                    ))
                })?;
                StepAction::Visualization {
                    table,
                    hint: raw.hint.unwrap_or_default(),
                }
            }
            other => {
                return Err(AskdbError::plan_invalid(format!(
                    "step {} has unknown kind '{other}'",
                    raw.index
                )))
            }
        };

        steps.push(Step {
            index: raw.index,
            description: raw.description,
            action,
        });
    }

    let plan = Plan { steps };
    validate_references(&plan, tools, existing_tables)?;
    Ok(plan)
}

/// Validates tool references, argument schemas and table references.
fn validate_references(
    plan: &Plan,
    tools: &[ToolSpec],
    existing_tables: &BTreeSet<String>,
) -> Result<()> {
    let mut produced: BTreeSet<String> = existing_tables.clone();

    for step in &plan.steps {
        match &step.action {
            StepAction::ToolCall {
                tool_name,
                arguments,
            } => {
                let tool = tools.iter().find(|t| &t.name == tool_name).ok_or_else(|| {
                    AskdbError::plan_invalid(format!(
                        "step {} references unknown tool '{tool_name}'",
                        step.index
                    ))
                })?;
                tool.validate_arguments(arguments)
                    .map_err(AskdbError::plan_invalid)?;
            }
            StepAction::Query { sql, .. } => {
                if let Some(sql) = sql {
                    for reference in step_table_pattern().find_iter(&sql.to_lowercase()) {
                        let name = reference.as_str();
                        if !produced.contains(name) {
                            return Err(AskdbError::plan_invalid(format!(
                                "step {} references table '{name}' which no earlier step produces",
                                step.index
                            )));
                        }
                    }
                }
            }
            StepAction::Visualization { table, .. } => {
                if !produced.contains(table) {
                    return Err(AskdbError::plan_invalid(format!(
                        "step {} visualises table '{table}' which no earlier step produces",
                        step.index
                    )));
                }
            }
        }
        if let Some(table) = step.produces_table() {
            produced.insert(table);
        }
    }

    Ok(())
}
