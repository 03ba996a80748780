//! Data-source abstraction layer for askdb.
//!
//! Presents every backend — SQL engines, a document store, and REST APIs —
//! behind a single query contract. The registry of backend kinds is a closed
//! enum; `make_handler` is the central factory.

pub mod api;
mod mock;
mod mongo;
mod mysql;
mod postgres;
mod sqlite;
pub mod types;

pub use api::{ExternalApiHandler, KosisHandler};
pub use mock::{FailingHandler, MockHandler};
pub use mongo::MongoHandler;
pub use mysql::MySqlHandler;
pub use postgres::PostgresHandler;
pub use sqlite::SqliteHandler;
pub use types::{
    ColumnDescriptor, Operation, QueryResult, Row, SchemaSnapshot, TableDescriptor, TestResult,
    Value,
};

use crate::connection::ConnectionConfig;
use crate::error::{AskdbError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default timeout for a handler `execute` call, in seconds.
pub const EXECUTE_TIMEOUT_SECS: u64 = 30;

/// Supported backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Mysql,
    Postgresql,
    Mongodb,
    Sqlite,
    KosisApi,
    ExternalApi,
    // Announced but not installed; `make_handler` fails with UnsupportedKind.
    Redis,
    Oracle,
    Mssql,
}

impl BackendKind {
    /// Returns the kind as its wire tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Postgresql => "postgresql",
            Self::Mongodb => "mongodb",
            Self::Sqlite => "sqlite",
            Self::KosisApi => "kosis_api",
            Self::ExternalApi => "external_api",
            Self::Redis => "redis",
            Self::Oracle => "oracle",
            Self::Mssql => "mssql",
        }
    }

    /// Parses a kind from its wire tag.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mysql" => Some(Self::Mysql),
            "postgres" | "postgresql" => Some(Self::Postgresql),
            "mongodb" | "mongo" => Some(Self::Mongodb),
            "sqlite" => Some(Self::Sqlite),
            "kosis_api" | "kosis" => Some(Self::KosisApi),
            "external_api" => Some(Self::ExternalApi),
            "redis" => Some(Self::Redis),
            "oracle" => Some(Self::Oracle),
            "mssql" => Some(Self::Mssql),
            _ => None,
        }
    }

    /// Returns the default port for network backends.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Mysql => Some(3306),
            Self::Postgresql => Some(5432),
            Self::Mongodb => Some(27017),
            Self::Redis => Some(6379),
            Self::Oracle => Some(1521),
            Self::Mssql => Some(1433),
            Self::Sqlite | Self::KosisApi | Self::ExternalApi => None,
        }
    }

    /// Returns true when a handler implementation is installed for this kind.
    pub fn is_installed(&self) -> bool {
        !matches!(self, Self::Redis | Self::Oracle | Self::Mssql)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Backend kinds announced by the registry, installed or not.
pub fn supported_kinds() -> &'static [BackendKind] {
    &[
        BackendKind::Mysql,
        BackendKind::Postgresql,
        BackendKind::Mongodb,
        BackendKind::Sqlite,
        BackendKind::KosisApi,
        BackendKind::ExternalApi,
        BackendKind::Redis,
        BackendKind::Oracle,
        BackendKind::Mssql,
    ]
}

/// Widget hint for rendering one config field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetKind {
    Text,
    Number,
    Password,
    Bool,
    Select,
    Textarea,
}

/// Description of one recognised ConnectionConfig field for a backend kind.
#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
    /// Field name as it appears in the config.
    pub name: &'static str,
    /// Human label.
    pub label: &'static str,
    /// Widget hint.
    pub widget: WidgetKind,
    /// Whether the field must be present and non-empty.
    pub required: bool,
    /// Default value, when one applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<&'static str>,
    /// Allowed values for select widgets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<&'static [&'static str]>,
}

impl FieldSpec {
    fn new(name: &'static str, label: &'static str, widget: WidgetKind, required: bool) -> Self {
        Self {
            name,
            label,
            widget,
            required,
            default: None,
            options: None,
        }
    }

    fn with_default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }

    fn with_options(mut self, options: &'static [&'static str]) -> Self {
        self.options = Some(options);
        self
    }
}

/// Returns the recognised config fields for a backend kind.
pub fn describe_fields(kind: BackendKind) -> Vec<FieldSpec> {
    use WidgetKind::*;
    match kind {
        BackendKind::Mysql => vec![
            FieldSpec::new("host", "Host", Text, true),
            FieldSpec::new("port", "Port", Number, true).with_default("3306"),
            FieldSpec::new("database", "Database", Text, true),
            FieldSpec::new("username", "Username", Text, true),
            FieldSpec::new("password", "Password", Password, false),
            FieldSpec::new("ssl", "Use SSL", Bool, false),
            FieldSpec::new("schema", "Schema", Text, false),
        ],
        BackendKind::Postgresql => vec![
            FieldSpec::new("host", "Host", Text, true),
            FieldSpec::new("port", "Port", Number, true).with_default("5432"),
            FieldSpec::new("database", "Database", Text, true),
            FieldSpec::new("username", "Username", Text, true),
            FieldSpec::new("password", "Password", Password, false),
            FieldSpec::new("ssl", "Use SSL", Bool, false),
            FieldSpec::new("schema", "Schema", Text, false).with_default("public"),
        ],
        BackendKind::Mongodb => vec![
            FieldSpec::new("host", "Host", Text, true),
            FieldSpec::new("port", "Port", Number, true).with_default("27017"),
            FieldSpec::new("database", "Database", Text, true),
            FieldSpec::new("connectionString", "Connection string", Textarea, false),
            FieldSpec::new("username", "Username", Text, false),
            FieldSpec::new("password", "Password", Password, false),
            FieldSpec::new("authSource", "Auth source", Text, false).with_default("admin"),
        ],
        BackendKind::Sqlite => vec![
            FieldSpec::new("filePath", "Database file", Text, true),
            FieldSpec::new("mode", "Open mode", Select, false)
                .with_default("readwrite")
                .with_options(&["readonly", "readwrite", "readwritecreate"]),
        ],
        BackendKind::KosisApi => vec![
            FieldSpec::new("api_key", "API key", Password, true),
            FieldSpec::new("base_url", "Base URL", Text, false)
                .with_default(api::kosis::KOSIS_BASE_URL),
        ],
        BackendKind::ExternalApi => vec![
            FieldSpec::new("base_url", "Base URL", Text, true),
            FieldSpec::new("api_key", "API key", Password, false),
            FieldSpec::new("username", "Username", Text, false),
            FieldSpec::new("password", "Password", Password, false),
        ],
        // Placeholder schemas for kinds without an installed handler.
        BackendKind::Redis | BackendKind::Oracle | BackendKind::Mssql => vec![
            FieldSpec::new("host", "Host", Text, true),
            FieldSpec::new("port", "Port", Number, true),
            FieldSpec::new("username", "Username", Text, false),
            FieldSpec::new("password", "Password", Password, false),
        ],
    }
}

/// Trait defining the uniform query contract every backend handler implements.
///
/// `execute` never raises across the interface: failures come back as a
/// `QueryResult` with `success = false`. Lifecycle and schema operations
/// return `Result` so the Connection Manager can map their error kinds.
#[async_trait]
pub trait DataHandler: Send + Sync + std::fmt::Debug {
    /// Establishes the backing driver state (pool, client).
    async fn connect(&self) -> Result<()>;

    /// Tears down the backing driver state. Idempotent.
    async fn disconnect(&self);

    /// Performs a cheap round-trip and reports latency and server version.
    async fn test(&self) -> TestResult;

    /// Introspects the backend schema.
    ///
    /// With `include_columns = false` the handler must not issue per-column
    /// metadata queries; it returns a fast table list instead.
    async fn schema(&self, include_columns: bool) -> Result<SchemaSnapshot>;

    /// Executes a query, returning a uniform tabular result.
    async fn execute(&self, query: &str, params: Option<&serde_json::Value>) -> QueryResult;

    /// Query verbs this handler supports. Informational.
    fn supported_operations(&self) -> &'static [Operation];
}

/// Creates a handler instance for the given connection configuration.
///
/// This is the central factory: it validates the config against the kind's
/// field schema and constructs the handler without connecting. Driver state
/// is only built on the first `connect`, so a missing optional backend never
/// breaks startup.
pub fn make_handler(config: &ConnectionConfig) -> Result<Arc<dyn DataHandler>> {
    config.validate()?;

    match config.kind {
        BackendKind::Mysql => Ok(Arc::new(MySqlHandler::new(config.clone()))),
        BackendKind::Postgresql => Ok(Arc::new(PostgresHandler::new(config.clone()))),
        BackendKind::Mongodb => Ok(Arc::new(MongoHandler::new(config.clone()))),
        BackendKind::Sqlite => Ok(Arc::new(SqliteHandler::new(config.clone()))),
        BackendKind::KosisApi => Ok(Arc::new(KosisHandler::new(config.clone())?)),
        BackendKind::ExternalApi => Ok(Arc::new(ExternalApiHandler::new(config.clone())?)),
        BackendKind::Redis | BackendKind::Oracle | BackendKind::Mssql => Err(
            AskdbError::UnsupportedKind(format!("no handler installed for {}", config.kind)),
        ),
    }
}
