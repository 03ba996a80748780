//! KOSIS (Korean Statistical Information Service) API handler.
//!
//! Publishes the KOSIS OpenAPI endpoints as virtual tables so statistical
//! series can be queried with plain `SELECT ... WHERE` syntax.

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
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

/// Default KOSIS OpenAPI base URL.
pub const KOSIS_BASE_URL: &str = "https://kosis.kr/openapi";

/// KOSIS API handler.
#[derive(Debug)]
pub struct KosisHandler {
    config: ConnectionConfig,
    client: reqwest::Client,
    base_url: String,
    tables: Vec<VirtualTable>,
}

impl KosisHandler {
    /// Creates a handler from a validated config.
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        let client = build_http_client().map_err(AskdbError::internal)?;
        let base_url = config
            .opt_str("base_url")
            .unwrap_or_else(|| KOSIS_BASE_URL.to_string());
        Ok(Self {
            config,
            client,
            base_url,
            tables: virtual_tables(),
        })
    }

    fn api_key(&self) -> Result<String> {
        self.config.require_str("api_key")
    }

    fn find_table(&self, name: &str) -> Option<&VirtualTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Published virtual tables; exposed for tool-spec construction.
    pub fn virtual_tables(&self) -> &[VirtualTable] {
        &self.tables
    }

    async fn call_endpoint(
        &self,
        table: &VirtualTable,
        params: &BTreeMap<String, String>,
    ) -> std::result::Result<serde_json::Value, String> {
        let api_key = self.api_key().map_err(|e| e.to_string())?;
        let url = format!("{}{}", self.base_url, table.path);

        let mut request = self
            .client
            .get(&url)
            .query(&[
                ("method", "getList"),
                ("apiKey", api_key.as_str()),
                ("format", "json"),
                ("jsonVD", "Y"),
            ]);
        for (name, value) in params {
            request = request.query(&[(name.as_str(), value.as_str())]);
        }

        debug!(table = %table.name, "kosis request");
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                format!("KOSIS request timed out: {e}")
            } else {
                format!("KOSIS request failed: {e}")
            }
        })?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| format!("KOSIS returned a non-JSON response: {e}"))?;

        if !status.is_success() {
            return Err(format!("KOSIS returned HTTP {status}: {body}"));
        }

        // Errors come back as an object with err/errMsg even on HTTP 200.
        if let Some(err_msg) = body.get("errMsg").and_then(|v| v.as_str()) {
            let code = body
                .get("err")
                .map(|v| v.to_string())
                .unwrap_or_else(|| "?".to_string());
            return Err(format!("KOSIS error {code}: {err_msg}"));
        }

        Ok(body)
    }

    /// Runs one virtual-table call directly from a parameter map.
    ///
    /// This is the entry point used by the statically registered
    /// `fetch_kosis_data` tool; it shares the default-supplying policy with
    /// SQL-shaped queries.
    pub async fn fetch(
        &self,
        table_name: &str,
        arguments: &BTreeMap<String, String>,
    ) -> QueryResult {
        let table = match self.find_table(table_name) {
            Some(t) => t.clone(),
            None => return QueryResult::fail(format!("unknown virtual table '{table_name}'")),
        };
        let filters: Vec<(String, String)> = arguments
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let params = match resolve_params(&table, &filters) {
            Ok(p) => p,
            Err(e) => return QueryResult::fail(e),
        };

        let start = Instant::now();
        match self.call_endpoint(&table, &params).await {
            Ok(body) => json_to_result(body)
                .with_execution_time_ms(start.elapsed().as_millis() as u64),
            Err(e) => QueryResult::fail(e)
                .with_execution_time_ms(start.elapsed().as_millis() as u64),
        }
    }
}

#[async_trait]
impl DataHandler for KosisHandler {
    async fn connect(&self) -> Result<()> {
        // Stateless HTTP backend; the key is checked on first call.
        self.api_key().map(|_| ())
    }

    async fn disconnect(&self) {}

    async fn test(&self) -> TestResult {
        let start = Instant::now();
        let result = self.client.get(&self.base_url).send().await;
        let latency = start.elapsed().as_millis() as u64;
        match result {
            Ok(response) if response.status().is_server_error() => TestResult::fail(
                latency,
                format!("KOSIS endpoint returned HTTP {}", response.status()),
            ),
            Ok(_) => TestResult::ok(latency, Some("KOSIS OpenAPI".to_string())),
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

        let start = Instant::now();
        let result = match self.call_endpoint(&table, &params).await {
            Ok(body) => json_to_result(body),
            Err(e) => QueryResult::fail(e),
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

/// The published KOSIS virtual tables and their parameter mappings.
///
/// The `objL1` / `itmId` defaults on `statistics_data` are handler policy:
/// they keep partial queries working for the common single-breakdown tables,
/// and the upstream error is surfaced verbatim when they do not apply.
fn virtual_tables() -> Vec<VirtualTable> {
    vec![
        VirtualTable {
            name: "statistics_search".to_string(),
            path: "/statisticsSearch.do".to_string(),
            description: "Full-text search over statistical tables".to_string(),
            params: vec![VirtualParam::required("searchNm")],
        },
        VirtualTable {
            name: "statistics_list".to_string(),
            path: "/statisticsList.do".to_string(),
            description: "Browse the statistics catalogue tree".to_string(),
            params: vec![
                VirtualParam::required("vwCd"),
                VirtualParam::required("parentListId"),
            ],
        },
        VirtualTable {
            name: "statistics_data".to_string(),
            path: "/Param/statisticsParameterData.do".to_string(),
            description: "Fetch observation data for one statistical table".to_string(),
            params: vec![
                VirtualParam::required("orgId"),
                VirtualParam::required("tblId"),
                VirtualParam::required("prdSe"),
                VirtualParam::optional("startPrdDe"),
                VirtualParam::optional("endPrdDe"),
                VirtualParam::required("objL1").with_default("ALL"),
                VirtualParam::optional("objL2"),
                VirtualParam::optional("objL3"),
                VirtualParam::required("itmId").with_default("ALL"),
            ],
        },
        VirtualTable {
            name: "statistics_bigdata".to_string(),
            path: "/statisticsBigData.do".to_string(),
            description: "Download a registered large dataset".to_string(),
            params: vec![
                VirtualParam::required("userStatsId"),
                VirtualParam::optional("format"),
            ],
        },
        VirtualTable {
            name: "statistics_explanation".to_string(),
            path: "/statisticsExplData.do".to_string(),
            description: "Methodology notes for one statistic".to_string(),
            params: vec![VirtualParam::required("statId")],
        },
        VirtualTable {
            name: "statistics_table_detail".to_string(),
            path: "/statisticsTblData.do".to_string(),
            description: "Metadata for one statistical table".to_string(),
            params: vec![VirtualParam::required("tblId")],
        },
        VirtualTable {
            name: "statistics_main_indicator".to_string(),
            path: "/mainIndicator.do".to_string(),
            description: "Headline national indicators".to_string(),
            params: Vec::new(),
        },
    ]
}
