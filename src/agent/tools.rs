//! Tool specifications exposed to the LLM during planning.
//!
//! The tool list is the union of the active connection's handler operations
//! (execute_sql for relational backends, execute_mongo_query for the document
//! store, one tool per virtual table for API backends) and the statically
//! registered tools (fetch_kosis_data).

use crate::handler::api::VirtualTable;
use crate::handler::{BackendKind, Operation};
use serde::{Deserialize, Serialize};

/// Parameter type accepted by a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Bool,
    Object,
}

impl ParamType {
    fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Object => value.is_object() || value.is_array(),
        }
    }
}

/// One parameter of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: bool,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl ParamSpec {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            required: true,
            description: description.to_string(),
            default: None,
        }
    }

    pub fn optional(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            required: false,
            description: description.to_string(),
            default: None,
        }
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Description of one tool exposed to the LLM when planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    /// Validates a tool_call argument mapping against this spec: required
    /// parameters present, and present parameters correctly typed.
    pub fn validate_arguments(
        &self,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), String> {
        for param in &self.params {
            match arguments.get(&param.name) {
                None if param.required => {
                    return Err(format!(
                        "tool '{}' is missing required argument '{}'",
                        self.name, param.name
                    ))
                }
                Some(value) if !value.is_null() && !param.param_type.matches(value) => {
                    return Err(format!(
                        "tool '{}' argument '{}' has the wrong type",
                        self.name, param.name
                    ))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Builds the handler-backed tools for a backend kind.
pub fn handler_tools(kind: BackendKind, operations: &[Operation], virtual_tables: &[VirtualTable]) -> Vec<ToolSpec> {
    match kind {
        BackendKind::Mysql | BackendKind::Postgresql | BackendKind::Sqlite => {
            let verbs: Vec<String> = operations.iter().map(|op| format!("{op:?}")).collect();
            vec![ToolSpec {
                name: "execute_sql".to_string(),
                description: format!(
                    "Execute a SQL query against the active {kind} connection ({}).",
                    verbs.join(", ")
                ),
                params: vec![ParamSpec::required(
                    "query",
                    ParamType::String,
                    "The SQL query to execute",
                )],
            }]
        }
        BackendKind::Mongodb => vec![ToolSpec {
            name: "execute_mongo_query".to_string(),
            description: "Run a find, aggregate or count operation against the active MongoDB \
                          connection."
                .to_string(),
            params: vec![
                ParamSpec::required("operation", ParamType::String, "find, aggregate or count"),
                ParamSpec::required("collection", ParamType::String, "Target collection"),
                ParamSpec::optional("filter", ParamType::Object, "Filter document"),
                ParamSpec::optional("projection", ParamType::Object, "Projection document"),
                ParamSpec::optional("pipeline", ParamType::Object, "Aggregation pipeline stages"),
            ],
        }],
        BackendKind::KosisApi | BackendKind::ExternalApi => {
            let mut tools = vec![ToolSpec {
                name: "execute_sql".to_string(),
                description: "Run a SELECT with equality predicates against one of the \
                              connection's virtual tables."
                    .to_string(),
                params: vec![ParamSpec::required(
                    "query",
                    ParamType::String,
                    "SELECT ... FROM <virtual_table> WHERE <field> = <value> [AND ...]",
                )],
            }];
            tools.extend(virtual_tables.iter().map(|table| ToolSpec {
                name: format!("query_{}", table.name),
                description: format!("{} (virtual table '{}')", table.description, table.name),
                params: table
                    .params
                    .iter()
                    .map(|p| {
                        let mut spec = if p.required && p.default.is_none() {
                            ParamSpec::required(&p.name, ParamType::String, "Request parameter")
                        } else {
                            ParamSpec::optional(&p.name, ParamType::String, "Request parameter")
                        };
                        if let Some(default) = &p.default {
                            spec = spec.with_default(serde_json::Value::String(default.clone()));
                        }
                        spec
                    })
                    .collect(),
            }));
            tools
        }
        BackendKind::Redis | BackendKind::Oracle | BackendKind::Mssql => Vec::new(),
    }
}

/// The statically registered KOSIS data tool, available whenever a KOSIS API
/// key is configured, regardless of the active connection.
pub fn fetch_kosis_data_tool() -> ToolSpec {
    ToolSpec {
        name: "fetch_kosis_data".to_string(),
        description: "Fetch observation data for one KOSIS statistical table. Defaults are \
                      supplied for objL1 and itmId when omitted."
            .to_string(),
        params: vec![
            ParamSpec::required("orgId", ParamType::String, "Publishing organisation id"),
            ParamSpec::required("tblId", ParamType::String, "Statistical table id"),
            ParamSpec::required("prdSe", ParamType::String, "Period granularity (Y, Q, M)"),
            ParamSpec::optional("startPrdDe", ParamType::String, "First period, e.g. 2020"),
            ParamSpec::optional("endPrdDe", ParamType::String, "Last period, e.g. 2023"),
            ParamSpec::optional("objL1", ParamType::String, "First breakdown dimension")
                .with_default(serde_json::Value::String("ALL".to_string())),
            ParamSpec::optional("itmId", ParamType::String, "Item id")
                .with_default(serde_json::Value::String("ALL".to_string())),
        ],
    }
}

/// Formats the tool list for the planning prompt.
pub fn format_for_llm(tools: &[ToolSpec]) -> String {
    if tools.is_empty() {
        return "(no tools available)".to_string();
    }
    let mut out = String::new();
    for tool in tools {
        out.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        for param in &tool.params {
            out.push_str(&format!(
                "    {} ({:?}{}){}\n",
                param.name,
                param.param_type,
                if param.required { ", required" } else { "" },
                if param.description.is_empty() {
                    String::new()
                } else {
                    format!(" — {}", param.description)
                },
            ));
        }
    }
    out
}
