//! Generic external REST API handler.
//!
//! The generic variant of the API-as-table abstraction: base URL, optional
//! basic auth or API-key header, and virtual tables declared in the
//! connection config under `virtual_tables`:
//!
//! ```json
//! {"virtual_tables": [{"name": "rates", "path": "/v1/rates",
//!   "params": [{"name": "currency", "required": true}]}]}
//! ```

use crate::connection::ConnectionConfig;
use crate::error::{AskdbError, Result};
use crate::handler::api::{
    build_http_client, json_to_result, parse_table_query, project_columns, resolve_params,
    VirtualParam, VirtualTable,
};
use crate::handler::types::{
    ColumnDescriptor, QueryResult, SchemaSnapshot, TableDescriptor, TestResult,
};
use crate::handler::{DataHandler, Operation};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::time::Instant;

#[derive(Debug, Deserialize)]
struct DeclaredParam {
    name: String,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    default: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeclaredTable {
    name: String,
    path: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    params: Vec<DeclaredParam>,
}

/// Generic external-API data handler.
#[derive(Debug)]
pub struct ExternalApiHandler {
    config: ConnectionConfig,
    client: reqwest::Client,
    base_url: String,
    tables: Vec<VirtualTable>,
}

impl ExternalApiHandler {
    /// Creates a handler from a validated config, decoding its declared
    /// virtual tables.
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        let client = build_http_client().map_err(AskdbError::internal)?;
        let base_url = config.require_str("base_url")?;
        url::Url::parse(&base_url)
            .map_err(|e| AskdbError::config_invalid(format!("invalid base_url: {e}")))?;

        let declared: Vec<DeclaredTable> = match config.options.get("virtual_tables") {
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                AskdbError::config_invalid(format!("invalid virtual_tables declaration: {e}"))
            })?,
            None => Vec::new(),
        };
        let tables = declared
            .into_iter()
            .map(|t| VirtualTable {
                name: t.name,
                path: t.path,
                description: t.description,
                params: t
                    .params
                    .into_iter()
                    .map(|p| VirtualParam {
                        name: p.name,
                        required: p.required,
                        default: p.default,
                    })
                    .collect(),
            })
            .collect();

        Ok(Self {
            config,
            client,
            base_url,
            tables,
        })
    }

    /// Declared virtual tables; exposed for tool-spec construction.
    pub fn virtual_tables(&self) -> &[VirtualTable] {
        &self.tables
    }

    fn find_table(&self, name: &str) -> Option<&VirtualTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Applies the configured auth scheme: basic auth when a username is
    /// present, otherwise an API-key header when a key is present.
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(username) = self.config.opt_str("username") {
            let password = self.config.opt_str("password").unwrap_or_default();
            let token = base64::engine::general_purpose::STANDARD
                .encode(format!("{username}:{password}"));
            return request.header("Authorization", format!("Basic {token}"));
        }
        if let Some(api_key) = self.config.opt_str("api_key") {
            return request.header("X-API-Key", api_key);
        }
        request
    }
}

#[async_trait]
impl DataHandler for ExternalApiHandler {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn test(&self) -> TestResult {
        let start = Instant::now();
        let request = self.authorize(self.client.get(&self.base_url));
        let result = request.send().await;
        let latency = start.elapsed().as_millis() as u64;
        match result {
            Ok(response) if response.status().is_server_error() => TestResult::fail(
                latency,
                format!("endpoint returned HTTP {}", response.status()),
            ),
            Ok(_) => TestResult::ok(latency, None),
            Err(e) => TestResult::fail(latency, e.to_string()),
        }
    }

    async fn schema(&self, include_columns: bool) -> Result<SchemaSnapshot> {
        let tables = self
            .tables
            .iter()
            .map(|table| TableDescriptor {
                name: table.name.clone(),
                schema_namespace: None,
                columns: if include_columns {
                    table
                        .params
                        .iter()
                        .map(|p| {
                            ColumnDescriptor::new(p.name.clone(), "parameter")
                                .nullable(!p.required)
                        })
                        .collect()
                } else {
                    Vec::new()
                },
                row_count_estimate: None,
            })
            .collect();
        Ok(SchemaSnapshot { tables })
    }

    async fn execute(&self, query: &str, _params: Option<&serde_json::Value>) -> QueryResult {
        let parsed = match parse_table_query(query) {
            Ok(q) => q,
            Err(e) => return QueryResult::fail(e),
        };
        let table = match self.find_table(&parsed.table) {
            Some(t) => t.clone(),
            None => {
                return QueryResult::fail(format!("unknown virtual table '{}'", parsed.table))
            }
        };
        let params = match resolve_params(&table, &parsed.filters) {
            Ok(p) => p,
            Err(e) => return QueryResult::fail(e),
        };

        let url = format!("{}{}", self.base_url, table.path);
        let mut request = self.authorize(self.client.get(&url));
        for (name, value) in &params {
            request = request.query(&[(name.as_str(), value.as_str())]);
        }

        let start = Instant::now();
        let result = match request.send().await {
            Ok(response) => {
                let status = response.status();
                match response.json::<serde_json::Value>().await {
                    Ok(_) if !status.is_success() => {
                        QueryResult::fail(format!("endpoint returned HTTP {status}"))
                    }
                    Ok(body) => json_to_result(body),
                    Err(e) => QueryResult::fail(format!("non-JSON response: {e}")),
                }
            }
            Err(e) if e.is_timeout() => {
                QueryResult::fail(format!("request timed out: {e}"))
            }
            Err(e) => QueryResult::fail(format!("request failed: {e}")),
        };
        let result = result.with_execution_time_ms(start.elapsed().as_millis() as u64);

        match parsed.columns {
            Some(columns) if result.success => project_columns(result, &columns),
            _ => result,
        }
    }

    fn supported_operations(&self) -> &'static [Operation] {
        &[Operation::Select]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::BackendKind;

    fn test_config() -> ConnectionConfig {
        ConnectionConfig::new("ext-test", "rates", BackendKind::ExternalApi)
            .with_option("base_url", "https://api.example.com")
            .with_option(
                "virtual_tables",
                serde_json::json!([
                    {
                        "name": "rates",
                        "path": "/v1/rates",
                        "params": [{"name": "currency", "required": true}]
                    },
                    {"name": "symbols", "path": "/v1/symbols"}
                ]),
            )
    }

    #[test]
    fn test_declared_tables_are_parsed() {
        let handler = ExternalApiHandler::new(test_config()).unwrap();
        assert_eq!(handler.virtual_tables().len(), 2);
        let rates = handler.find_table("rates").unwrap();
        assert!(rates.params[0].required);
    }

    #[test]
    fn test_relative_base_url_rejected() {
        let config = ConnectionConfig::new("e3", "bad", BackendKind::ExternalApi)
            .with_option("base_url", "not a url");
        let err = ExternalApiHandler::new(config).unwrap_err();
        assert!(err.to_string().contains("invalid base_url"));
    }

    #[test]
    fn test_invalid_declaration_rejected() {
        let config = ConnectionConfig::new("e2", "bad", BackendKind::ExternalApi)
            .with_option("base_url", "https://api.example.com")
            .with_option("virtual_tables", serde_json::json!({"not": "a list"}));
        let err = ExternalApiHandler::new(config).unwrap_err();
        assert!(matches!(err, AskdbError::ConfigInvalid(_)));
    }

    #[tokio::test]
    async fn test_missing_required_param_fails_before_http() {
        let handler = ExternalApiHandler::new(test_config()).unwrap();
        let result = handler.execute("SELECT * FROM rates", None).await;
        assert!(!result.success);
        assert_eq!(
            result.error.unwrap(),
            "required parameter currency missing"
        );
    }

    #[tokio::test]
    async fn test_unknown_table_fails_before_http() {
        let handler = ExternalApiHandler::new(test_config()).unwrap();
        let result = handler.execute("SELECT * FROM nope", None).await;
        assert!(!result.success);
    }

    #[test]
    fn test_schema_lists_declared_tables() {
        let handler = ExternalApiHandler::new(test_config()).unwrap();
        let snapshot = tokio_test::block_on(handler.schema(true)).unwrap();
        assert_eq!(snapshot.tables.len(), 2);
        assert_eq!(snapshot.tables[0].columns[0].name, "currency");
    }
}
