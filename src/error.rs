//! Error types for askdb.
//!
//! Defines the main error enum used throughout the application.

use thiserror::Error;

/// Main error type for askdb operations.
#[derive(Error, Debug)]
pub enum AskdbError {
    /// A connection config is missing required fields or violates a validator.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A connection config names a backend for which no handler is installed.
    #[error("Unsupported backend kind: {0}")]
    UnsupportedKind(String),

    /// The handler could not reach the backend.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// An operation was attempted against a non-active or disconnected connection.
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// No connection with the given id exists.
    #[error("Connection not found: {0}")]
    NotFound(String),

    /// A connection with the given id already exists.
    #[error("Duplicate connection id: {0}")]
    DuplicateId(String),

    /// The backend rejected a query (syntax, permissions, upstream 4xx/5xx).
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// An external call exceeded its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The caller cancelled the request.
    #[error("cancelled")]
    Cancelled,

    /// LLM output failed plan validation.
    #[error("Invalid plan: {0}")]
    PlanInvalid(String),

    /// A statically registered tool failed.
    #[error("Tool call failed: {0}")]
    ToolCallFailed(String),

    /// The in-memory SQL executor rejected a query.
    #[error("Workspace SQL error: {0}")]
    WorkspaceSql(String),

    /// The reflection budget was exhausted without a successful plan.
    #[error("Planning budget exhausted: {0}")]
    BudgetExhausted(String),

    /// LLM API errors (rate limits, auth, malformed responses).
    #[error("LLM error: {0}")]
    Llm(String),

    /// Internal application errors (unexpected states, bugs).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AskdbError {
    /// Creates a config-invalid error with the given message.
    pub fn config_invalid(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }

    /// Creates a config-invalid error listing the offending fields.
    pub fn missing_fields(kind: &str, fields: &[&str]) -> Self {
        Self::ConfigInvalid(format!(
            "{kind} connection is missing required fields: {}",
            fields.join(", ")
        ))
    }

    /// Creates a connect-failed error with the given message.
    pub fn connect_failed(msg: impl Into<String>) -> Self {
        Self::ConnectFailed(msg.into())
    }

    /// Creates a not-connected error with the given message.
    pub fn not_connected(msg: impl Into<String>) -> Self {
        Self::NotConnected(msg.into())
    }

    /// Creates a query-failed error with the given message.
    pub fn query_failed(msg: impl Into<String>) -> Self {
        Self::QueryFailed(msg.into())
    }

    /// Creates a timeout error with the given message.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Creates a plan-invalid error with the given message.
    pub fn plan_invalid(msg: impl Into<String>) -> Self {
        Self::PlanInvalid(msg.into())
    }

    /// Creates a workspace SQL error with the given message.
    pub fn workspace_sql(msg: impl Into<String>) -> Self {
        Self::WorkspaceSql(msg.into())
    }

    /// Creates an LLM error with the given message.
    pub fn llm(msg: impl Into<String>) -> Self {
        Self::Llm(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for event payloads and API responses.
    pub fn category(&self) -> &'static str {
        match self {
            Self::ConfigInvalid(_) => "config_invalid",
            Self::UnsupportedKind(_) => "unsupported_kind",
            Self::ConnectFailed(_) => "connect_failed",
            Self::NotConnected(_) => "not_connected",
            Self::NotFound(_) => "not_found",
            Self::DuplicateId(_) => "duplicate_id",
            Self::QueryFailed(_) => "query_failed",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::PlanInvalid(_) => "plan_invalid",
            Self::ToolCallFailed(_) => "tool_call_failed",
            Self::WorkspaceSql(_) => "workspace_sql_error",
            Self::BudgetExhausted(_) => "budget_exhausted",
            Self::Llm(_) => "llm_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Result type alias using AskdbError.
pub type Result<T> = std::result::Result<T, AskdbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_connect_failed() {
        let err = AskdbError::connect_failed("Cannot connect to localhost:5432");
        assert_eq!(
            err.to_string(),
            "Connect failed: Cannot connect to localhost:5432"
        );
        assert_eq!(err.category(), "connect_failed");
    }

    #[test]
    fn test_error_display_query_failed() {
        let err = AskdbError::query_failed("column \"emal\" does not exist");
        assert_eq!(
            err.to_string(),
            "Query failed: column \"emal\" does not exist"
        );
        assert_eq!(err.category(), "query_failed");
    }

    #[test]
    fn test_missing_fields_lists_all() {
        let err = AskdbError::missing_fields("postgresql", &["host", "database"]);
        assert!(err.to_string().contains("host, database"));
        assert_eq!(err.category(), "config_invalid");
    }

    #[test]
    fn test_cancelled_message_is_stable() {
        // The orchestrator's terminal error event relies on this exact text.
        assert_eq!(AskdbError::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_error_display_plan_invalid() {
        let err = AskdbError::plan_invalid("step indices not contiguous");
        assert_eq!(err.to_string(), "Invalid plan: step indices not contiguous");
        assert_eq!(err.category(), "plan_invalid");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AskdbError>();
    }
}
