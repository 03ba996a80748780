//! Chart projection for workspace tables.
//!
//! Turns a tabular result into a chart-ready structure. Column selection
//! follows the hint when it names columns, otherwise the first non-numeric
//! column becomes the labels and every numeric column becomes a dataset.

use crate::error::{AskdbError, Result};
use crate::handler::types::{QueryResult, Value};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Supported chart kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Line,
    Bar,
    Pie,
    Doughnut,
}

/// One series of values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    /// Series label (the source column name).
    pub label: String,
    /// Values aligned with the chart labels; nulls become 0.
    pub values: Vec<f64>,
}

/// A chart-ready projection of one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartData {
    /// Chart kind chosen from the hint or the heuristics below.
    pub chart_kind: ChartKind,
    /// Category labels.
    pub labels: Vec<String>,
    /// One dataset per plotted column.
    pub datasets: Vec<Dataset>,
    /// Chart title.
    pub title: String,
}

fn period_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Years, year-months, quarters: 2023, 2023-04, 202304, 2023Q1.
    PATTERN.get_or_init(|| Regex::new(r"^\d{4}([-./]?\d{2}|Q[1-4])?$").expect("valid regex"))
}

const PERIOD_COLUMN_NAMES: &[&str] = &[
    "year", "month", "date", "period", "quarter", "time", "prd_de", "prdse",
];

/// Projects a result into chart data, honouring the hint.
pub fn chartify_result(table: &str, result: &QueryResult, hint: &str) -> Result<ChartData> {
    if result.columns.is_empty() || result.rows.is_empty() {
        return Err(AskdbError::workspace_sql(format!(
            "table '{table}' has no data to chart"
        )));
    }

    let numeric: Vec<bool> = (0..result.columns.len())
        .map(|i| {
            result
                .rows
                .iter()
                .any(|row| row.get(i).is_some_and(Value::is_numeric))
                && result.rows.iter().all(|row| {
                    row.get(i)
                        .map(|v| v.is_numeric() || v.is_null())
                        .unwrap_or(true)
                })
        })
        .collect();

    // Columns named in the hint, in column order.
    let hinted: Vec<usize> = result
        .columns
        .iter()
        .enumerate()
        .filter(|(_, name)| hint_names_column(hint, name))
        .map(|(i, _)| i)
        .collect();

    let (label_idx, dataset_idx) = if !hinted.is_empty() {
        let label = hinted
            .iter()
            .copied()
            .find(|&i| !numeric[i])
            .or_else(|| hinted.first().copied())
            .expect("hinted is non-empty");
        let datasets: Vec<usize> = hinted
            .into_iter()
            .filter(|&i| i != label && numeric[i])
            .collect();
        (label, datasets)
    } else {
        let label = (0..result.columns.len()).find(|&i| !numeric[i]).unwrap_or(0);
        let datasets: Vec<usize> = (0..result.columns.len())
            .filter(|&i| i != label && numeric[i])
            .collect();
        (label, datasets)
    };

    if dataset_idx.is_empty() {
        return Err(AskdbError::workspace_sql(format!(
            "table '{table}' has no numeric columns to plot"
        )));
    }

    let labels: Vec<String> = result
        .rows
        .iter()
        .map(|row| row[label_idx].to_display_string())
        .collect();
    let datasets: Vec<Dataset> = dataset_idx
        .iter()
        .map(|&i| Dataset {
            label: result.columns[i].clone(),
            values: result
                .rows
                .iter()
                .map(|row| row[i].as_f64().unwrap_or(0.0))
                .collect(),
        })
        .collect();

    let chart_kind = hinted_kind(hint).unwrap_or_else(|| {
        choose_kind(&result.columns[label_idx], &labels, &datasets)
    });

    Ok(ChartData {
        chart_kind,
        labels,
        datasets,
        title: humanize(table),
    })
}

/// Picks a chart kind: line for time/period labels, pie for a single
/// share-of-a-whole dataset, bar for categorical comparisons.
fn choose_kind(label_column: &str, labels: &[String], datasets: &[Dataset]) -> ChartKind {
    let lower = label_column.to_lowercase();
    let period_name = PERIOD_COLUMN_NAMES.iter().any(|n| lower.contains(n));
    let period_values = !labels.is_empty()
        && labels.iter().all(|l| period_pattern().is_match(l.trim()));
    if period_name || period_values {
        return ChartKind::Line;
    }

    if datasets.len() == 1 {
        let values = &datasets[0].values;
        let sum: f64 = values.iter().sum();
        let non_negative = values.iter().all(|v| *v >= 0.0);
        if non_negative && ((sum - 100.0).abs() < 1.5 || (sum - 1.0).abs() < 0.02) {
            return ChartKind::Pie;
        }
    }

    ChartKind::Bar
}

fn hinted_kind(hint: &str) -> Option<ChartKind> {
    let lower = hint.to_lowercase();
    if lower.contains("doughnut") || lower.contains("donut") {
        Some(ChartKind::Doughnut)
    } else if lower.contains("pie") {
        Some(ChartKind::Pie)
    } else if lower.contains("line") {
        Some(ChartKind::Line)
    } else if lower.contains("bar") {
        Some(ChartKind::Bar)
    } else {
        None
    }
}

/// True when the hint mentions the column name as a whole token.
fn hint_names_column(hint: &str, column: &str) -> bool {
    let lower_hint = hint.to_lowercase();
    let lower_col = column.to_lowercase();
    lower_hint
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|token| token == lower_col)
}

fn humanize(table: &str) -> String {
    table.replace('_', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn yearly() -> QueryResult {
        QueryResult::ok(
            vec!["year".to_string(), "gdp".to_string(), "population".to_string()],
            vec![
                vec![Value::Text("2020".into()), Value::Float(1.9), Value::Int(50)],
                vec![Value::Text("2021".into()), Value::Float(2.2), Value::Int(51)],
            ],
        )
    }

    #[test]
    fn test_default_selection_first_non_numeric_labels() {
        let chart = chartify_result("step1_fetch", &yearly(), "").unwrap();
        assert_eq!(chart.labels, vec!["2020", "2021"]);
        let names: Vec<&str> = chart.datasets.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(names, vec!["gdp", "population"]);
    }

    #[test]
    fn test_period_labels_choose_line() {
        let chart = chartify_result("t", &yearly(), "").unwrap();
        assert_eq!(chart.chart_kind, ChartKind::Line);
    }

    #[test]
    fn test_hint_kind_wins() {
        let chart = chartify_result("t", &yearly(), "bar chart please").unwrap();
        assert_eq!(chart.chart_kind, ChartKind::Bar);
    }

    #[test]
    fn test_hint_columns_win() {
        let chart = chartify_result("t", &yearly(), "plot gdp by year").unwrap();
        assert_eq!(chart.datasets.len(), 1);
        assert_eq!(chart.datasets[0].label, "gdp");
    }

    #[test]
    fn test_share_of_whole_chooses_pie() {
        let shares = QueryResult::ok(
            vec!["region".to_string(), "share".to_string()],
            vec![
                vec![Value::Text("north".into()), Value::Float(40.0)],
                vec![Value::Text("south".into()), Value::Float(35.0)],
                vec![Value::Text("east".into()), Value::Float(25.0)],
            ],
        );
        let chart = chartify_result("t", &shares, "").unwrap();
        assert_eq!(chart.chart_kind, ChartKind::Pie);
    }

    #[test]
    fn test_categorical_chooses_bar() {
        let counts = QueryResult::ok(
            vec!["city".to_string(), "count".to_string()],
            vec![
                vec![Value::Text("seoul".into()), Value::Int(12)],
                vec![Value::Text("busan".into()), Value::Int(7)],
            ],
        );
        let chart = chartify_result("t", &counts, "").unwrap();
        assert_eq!(chart.chart_kind, ChartKind::Bar);
    }

    #[test]
    fn test_empty_table_is_an_error() {
        let empty = QueryResult::ok(vec!["a".to_string()], vec![]);
        assert!(chartify_result("t", &empty, "").is_err());
    }

    #[test]
    fn test_no_numeric_columns_is_an_error() {
        let text_only = QueryResult::ok(
            vec!["a".to_string()],
            vec![vec![Value::Text("x".into())]],
        );
        assert!(chartify_result("t", &text_only, "").is_err());
    }

    #[test]
    fn test_title_is_humanised_table_name() {
        let chart = chartify_result("step1_fetch", &yearly(), "").unwrap();
        assert_eq!(chart.title, "step1 fetch");
    }
}
