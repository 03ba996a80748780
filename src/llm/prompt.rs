//! Prompt construction for LLM requests.
//!
//! Builds the planning, reflection, SQL-generation and direct-answer prompts.
//! Context (schema, tools, workspace tables, failure history) is injected as
//! pre-formatted text so the prompt layer stays free of agent types.

use crate::llm::types::Message;

/// System prompt for the planning call.
const PLAN_SYSTEM_PROMPT: &str = r#"You are a data-analysis planner. Decompose the user's question into an ordered list of steps executed against the available tools and an in-memory SQL workspace.

Return ONLY a JSON object of this shape, in a ```json code block:
{
  "steps": [
    {"index": 1, "kind": "tool_call", "description": "...", "tool_name": "<tool>", "arguments": {...}},
    {"index": 2, "kind": "query", "description": "...", "sql": "SELECT ...", "question": null},
    {"index": 3, "kind": "visualization", "description": "...", "table": "<workspace table>", "hint": "line|bar|pie|doughnut"}
  ]
}

Rules:
- Step indices start at 1 and are contiguous.
- tool_call steps must name an available tool and satisfy its required arguments.
- The result of step N is registered in the workspace as step{N}_{tool name} (tool calls) or step{N}_query (queries).
- query steps run SQL against the workspace; either give "sql" inline or give a natural-language "question" and leave "sql" null.
- query and visualization steps may only reference workspace tables produced by earlier steps or already listed below.
- Prefer the smallest plan that answers the question."#;

/// System prompt for workspace SQL generation.
const SQL_SYSTEM_PROMPT: &str = r#"You write SQLite SQL against an in-memory workspace. Generate one query answering the request.

Rules:
- Use only the tables and columns listed.
- Return ONLY the SQL, wrapped in a ```sql code block.
- Never modify data; SELECT statements only."#;

/// System prompt for the direct-answer path.
const GENERAL_SYSTEM_PROMPT: &str = r#"You are a helpful data assistant. Answer the user's question directly and concisely. When the question would be better answered by querying a connected data source, say so and suggest a concrete follow-up question."#;

/// Builds the planning request.
pub fn build_plan_messages(
    question: &str,
    schema_text: &str,
    tools_text: &str,
    workspace_text: &str,
) -> Vec<Message> {
    let context = format!(
        "AVAILABLE TOOLS:\n{tools_text}\n\nACTIVE CONNECTION SCHEMA:\n{schema_text}\n\nWORKSPACE TABLES:\n{workspace_text}\n\nQUESTION:\n{question}"
    );
    vec![Message::system(PLAN_SYSTEM_PROMPT), Message::user(context)]
}

/// Builds the re-planning request after one or more failed attempts.
///
/// The history must describe every prior plan and its outcome, including the
/// failing error. The revised plan continues from the current workspace
/// state; existing tables remain usable input.
pub fn build_reflection_messages(
    question: &str,
    schema_text: &str,
    tools_text: &str,
    workspace_text: &str,
    history_text: &str,
) -> Vec<Message> {
    let context = format!(
        "AVAILABLE TOOLS:\n{tools_text}\n\nACTIVE CONNECTION SCHEMA:\n{schema_text}\n\nWORKSPACE TABLES (already produced, usable as input):\n{workspace_text}\n\nPREVIOUS ATTEMPTS AND FAILURES:\n{history_text}\n\nQUESTION:\n{question}\n\nProduce a REVISED plan that continues from the current workspace state and avoids the failures above."
    );
    vec![Message::system(PLAN_SYSTEM_PROMPT), Message::user(context)]
}

/// Builds the SQL-generation request for a query step's sub-question.
pub fn build_sql_messages(workspace_text: &str, subquestion: &str) -> Vec<Message> {
    let context = format!("WORKSPACE TABLES:\n{workspace_text}\n\nREQUEST:\n{subquestion}");
    vec![Message::system(SQL_SYSTEM_PROMPT), Message::user(context)]
}

/// Builds the direct-answer request for `general` utterances.
pub fn build_general_messages(history: &[Message], question: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(GENERAL_SYSTEM_PROMPT));
    messages.extend(history.iter().cloned());
    messages.push(Message::user(question));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::Role;

    #[test]
    fn test_plan_messages_carry_context() {
        let messages = build_plan_messages(
            "gdp per capita",
            "Table: stats",
            "- fetch_kosis_data",
            "(no tables yet)",
        );
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("step{N}_{tool name}"));
        assert!(messages[1].content.contains("gdp per capita"));
        assert!(messages[1].content.contains("fetch_kosis_data"));
    }

    #[test]
    fn test_reflection_messages_include_history() {
        let messages = build_reflection_messages(
            "q",
            "(none)",
            "tools",
            "step1_fetch (3 rows): a, b",
            "plan 1 step 1 failed: required parameter objL1 missing",
        );
        assert!(messages[1].content.contains("objL1 missing"));
        assert!(messages[1].content.contains("REVISED plan"));
        assert!(messages[1].content.contains("step1_fetch"));
    }

    #[test]
    fn test_sql_messages_mention_workspace_only() {
        let messages = build_sql_messages("t (2 rows): a", "sum a");
        assert!(messages[0].content.contains("SQLite"));
        assert!(messages[1].content.contains("sum a"));
    }

    #[test]
    fn test_general_messages_keep_history_order() {
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        let messages = build_general_messages(&history, "what can you do?");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[3].content, "what can you do?");
    }
}
