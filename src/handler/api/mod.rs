//! REST-API-as-table handlers.
//!
//! An API handler publishes a fixed set of virtual "tables", each backed by
//! one endpoint. A query of the form
//! `SELECT ... FROM <virtual_table> WHERE <field> = <value> [AND ...]`
//! picks the endpoint via the FROM table and turns the equality predicates
//! into request parameters. Responses are decoded and flattened into the
//! uniform columns/rows shape.

pub mod external;
pub mod kosis;

pub use external::ExternalApiHandler;
pub use kosis::KosisHandler;

use crate::handler::types::{QueryResult, Row, Value};
use sqlparser::ast::{BinaryOperator, Expr, SelectItem, SetExpr, Statement, TableFactor};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeMap;
use std::time::Duration;

/// Default timeout for HTTP calls made by API handlers.
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// One request parameter recognised by a virtual table.
#[derive(Debug, Clone)]
pub struct VirtualParam {
    /// Parameter name as it appears in WHERE clauses and the request.
    pub name: String,
    /// Whether the upstream endpoint requires it.
    pub required: bool,
    /// Default supplied when the caller omits the parameter.
    pub default: Option<String>,
}

impl VirtualParam {
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            default: None,
        }
    }

    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// A published virtual table backed by one endpoint.
#[derive(Debug, Clone)]
pub struct VirtualTable {
    /// Name used in the FROM clause.
    pub name: String,
    /// Endpoint path appended to the handler's base URL.
    pub path: String,
    /// Human description, surfaced in tool specs.
    pub description: String,
    /// Recognised parameters.
    pub params: Vec<VirtualParam>,
}

/// A parsed SQL-like query against a virtual table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableQuery {
    /// The FROM table, which picks the endpoint.
    pub table: String,
    /// Explicit projection; None means star.
    pub columns: Option<Vec<String>>,
    /// Equality predicates from the WHERE clause, in source order.
    pub filters: Vec<(String, String)>,
}

/// Parses `SELECT ... FROM t WHERE a = 'x' AND b = 2` into a `TableQuery`.
///
/// Anything beyond single-table equality conjunctions is rejected, so a
/// malformed LLM query surfaces as an explicit error instead of a silently
/// wrong request.
pub fn parse_table_query(sql: &str) -> Result<TableQuery, String> {
    let statements = Parser::parse_sql(&GenericDialect {}, sql)
        .map_err(|e| format!("unparsable query: {e}"))?;
    if statements.len() != 1 {
        return Err("expected exactly one SELECT statement".to_string());
    }

    let query = match &statements[0] {
        Statement::Query(q) => q,
        _ => return Err("only SELECT is supported against virtual tables".to_string()),
    };
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err("only plain SELECT is supported against virtual tables".to_string()),
    };

    if select.from.len() != 1 || !select.from[0].joins.is_empty() {
        return Err("virtual-table queries must target exactly one table".to_string());
    }
    let table = match &select.from[0].relation {
        TableFactor::Table { name, .. } => name
            .0
            .last()
            .map(|ident| ident.value.clone())
            .ok_or_else(|| "missing table name".to_string())?,
        _ => return Err("virtual-table queries must name a table".to_string()),
    };

    let columns = {
        let mut explicit = Vec::new();
        let mut star = false;
        for item in &select.projection {
            match item {
                SelectItem::Wildcard(_) => star = true,
                SelectItem::UnnamedExpr(Expr::Identifier(ident)) => {
                    explicit.push(ident.value.clone())
                }
                other => return Err(format!("unsupported projection: {other}")),
            }
        }
        if star {
            None
        } else {
            Some(explicit)
        }
    };

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }

    Ok(TableQuery {
        table,
        columns,
        filters,
    })
}

fn collect_eq_filters(expr: &Expr, out: &mut Vec<(String, String)>) -> Result<(), String> {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, out)?;
            collect_eq_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } => {
            let field = match left.as_ref() {
                Expr::Identifier(ident) => ident.value.clone(),
                other => return Err(format!("unsupported predicate field: {other}")),
            };
            let value = literal_text(right)?;
            out.push((field, value));
            Ok(())
        }
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        other => Err(format!(
            "only equality predicates joined by AND are supported, got: {other}"
        )),
    }
}

fn literal_text(expr: &Expr) -> Result<String, String> {
    match expr {
        Expr::Value(value) => match value {
            sqlparser::ast::Value::SingleQuotedString(s)
            | sqlparser::ast::Value::DoubleQuotedString(s) => Ok(s.clone()),
            sqlparser::ast::Value::Number(n, _) => Ok(n.clone()),
            sqlparser::ast::Value::Boolean(b) => Ok(b.to_string()),
            other => Err(format!("unsupported literal: {other}")),
        },
        other => Err(format!("expected a literal value, got: {other}")),
    }
}

/// Builds the effective request parameters for a virtual table: declared
/// defaults first, then the query's equality predicates on top. Returns
/// `required parameter <name> missing` when a required parameter has neither
/// a filter value nor a default.
pub fn resolve_params(
    table: &VirtualTable,
    filters: &[(String, String)],
) -> Result<BTreeMap<String, String>, String> {
    let mut params: BTreeMap<String, String> = BTreeMap::new();
    for param in &table.params {
        if let Some(default) = &param.default {
            params.insert(param.name.clone(), default.clone());
        }
    }
    for (field, value) in filters {
        params.insert(field.clone(), value.clone());
    }
    for param in &table.params {
        if param.required && !params.contains_key(&param.name) {
            return Err(format!("required parameter {} missing", param.name));
        }
    }
    Ok(params)
}

/// Builds a reqwest client with the API-handler timeout applied.
pub fn build_http_client() -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .map_err(|e| format!("Failed to create HTTP client: {e}"))
}

/// Flattens a decoded JSON response into a tabular result.
///
/// An array of objects becomes one row per object (union of keys, null fill);
/// an object wrapping an array uses the first array member found; a lone
/// object becomes a single row.
pub fn json_to_result(value: serde_json::Value) -> QueryResult {
    let items: Vec<serde_json::Value> = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(map) => {
            let nested = map
                .values()
                .find(|v| v.is_array())
                .and_then(|v| v.as_array())
                .cloned();
            match nested {
                Some(items) => items,
                None => vec![serde_json::Value::Object(map)],
            }
        }
        other => vec![other],
    };

    let mut columns: Vec<String> = Vec::new();
    for item in &items {
        if let serde_json::Value::Object(map) = item {
            for key in map.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
    }

    if columns.is_empty() {
        // Scalar payloads become a single "value" column.
        let rows: Vec<Row> = items.into_iter().map(|v| vec![Value::from_json(v)]).collect();
        return QueryResult::ok(vec!["value".to_string()], rows);
    }

    let rows: Vec<Row> = items
        .into_iter()
        .map(|item| match item {
            serde_json::Value::Object(mut map) => columns
                .iter()
                .map(|col| {
                    map.remove(col)
                        .map(Value::from_json)
                        .unwrap_or(Value::Null)
                })
                .collect(),
            other => {
                let mut row: Row = vec![Value::Null; columns.len()];
                row[0] = Value::from_json(other);
                row
            }
        })
        .collect();

    QueryResult::ok(columns, rows)
}

/// Projects a result onto an explicit column list, preserving request order.
/// Columns absent from the response come back as all-null.
pub fn project_columns(result: QueryResult, columns: &[String]) -> QueryResult {
    let indices: Vec<Option<usize>> = columns
        .iter()
        .map(|name| result.column_index(name))
        .collect();
    let rows: Vec<Row> = result
        .rows
        .iter()
        .map(|row| {
            indices
                .iter()
                .map(|idx| idx.map(|i| row[i].clone()).unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    QueryResult::ok(columns.to_vec(), rows)
        .with_execution_time_ms(result.execution_time_ms)
        .with_truncated(result.truncated)
}
