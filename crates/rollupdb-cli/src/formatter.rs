//! Output formatters for command results.

use std::collections::BTreeSet;

use clap::ValueEnum;
use comfy_table::Table;
use rollupdb_core::query::{AggregateValue, SessionResult, TimeframeOutput};
use rollupdb_core::{IngestReport, QueryResponse};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format a query response.
    fn format_response(&self, response: &QueryResponse) -> String;

    /// Format an ingest summary.
    fn format_ingest(&self, events: usize, report: &IngestReport) -> String;

    /// Format a table listing.
    fn format_tables(&self, tables: &[String]) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_response(&self, response: &QueryResponse) -> String {
        let rows: Vec<(&TimeframeOutput, &AggregateValue)> = match &response.result {
            SessionResult::Value(value) => vec![(&response.timeframe, value)],
            SessionResult::Intervals(buckets) => {
                buckets.iter().map(|b| (&b.timeframe, &b.value)).collect()
            }
        };
        if rows.is_empty() {
            return "No results".to_string();
        }

        let group_fields: BTreeSet<&str> = rows
            .iter()
            .flat_map(|(_, value)| match value {
                AggregateValue::Total(_) => Vec::new(),
                AggregateValue::Groups(groups) => groups
                    .iter()
                    .flat_map(|g| g.fields.keys().map(String::as_str))
                    .collect(),
            })
            .collect();

        let mut table = Table::new();
        let mut header = vec!["start", "end"];
        header.extend(group_fields.iter().copied());
        header.push("result");
        table.set_header(header);

        for (timeframe, value) in rows {
            let bounds = [timeframe.start.clone(), timeframe.end.clone().unwrap_or_default()];
            match value {
                AggregateValue::Total(total) => {
                    let mut row: Vec<String> = bounds.to_vec();
                    row.extend(group_fields.iter().map(|_| String::new()));
                    row.push(total.to_string());
                    table.add_row(row);
                }
                AggregateValue::Groups(groups) => {
                    for group in groups {
                        let mut row: Vec<String> = bounds.to_vec();
                        row.extend(
                            group_fields
                                .iter()
                                .map(|f| group.fields.get(*f).cloned().unwrap_or_default()),
                        );
                        row.push(group.result.to_string());
                        table.add_row(row);
                    }
                }
            }
        }

        table.to_string()
    }

    fn format_ingest(&self, events: usize, report: &IngestReport) -> String {
        format!(
            "{} event(s) recorded: {} counter(s) written, {} skipped",
            events, report.written, report.skipped
        )
    }

    fn format_tables(&self, tables: &[String]) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Table"]);

        for name in tables {
            table.add_row(vec![name]);
        }

        table.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_response(&self, response: &QueryResponse) -> String {
        serde_json::to_string_pretty(response).unwrap_or_else(|e| {
            serde_json::json!({ "error": e.to_string() }).to_string()
        })
    }

    fn format_ingest(&self, events: usize, report: &IngestReport) -> String {
        serde_json::json!({
            "events": events,
            "written": report.written,
            "skipped": report.skipped
        })
        .to_string()
    }

    fn format_tables(&self, tables: &[String]) -> String {
        serde_json::json!(tables).to_string()
    }
}
