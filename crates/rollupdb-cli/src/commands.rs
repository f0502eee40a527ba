//! Subcommand implementations.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rollupdb_core::{
    EngineConfig, IngestReport, Ingestor, QueryEngine, QueryRequest, SledStore, StorageConfig,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::formatter::Formatter;

type CommandResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Open the sled range store under `path`.
pub fn open_store(path: &Path, page_size: usize) -> CommandResult<Arc<SledStore>> {
    let store = SledStore::open(StorageConfig::new(path).with_page_size(page_size))?;
    Ok(Arc::new(store))
}

/// Run one query request. Ctrl-C cancels the scan.
pub async fn run_query(
    config: EngineConfig,
    store: Arc<SledStore>,
    input: &Path,
    formatter: &dyn Formatter,
) -> CommandResult<String> {
    let request = QueryRequest::from_json(&read_input(input)?)?;
    let engine = QueryEngine::new(Arc::new(config), store);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let response = engine.execute_with_cancel(&request, &cancel).await?;
    Ok(formatter.format_response(&response))
}

/// Record every event of a JSON-lines input.
pub async fn run_ingest(
    config: EngineConfig,
    store: Arc<SledStore>,
    input: &Path,
    timestamp_field: &str,
    formatter: &dyn Formatter,
) -> CommandResult<String> {
    let content = read_input(input)?;
    let ingestor = Ingestor::new(Arc::new(config), Arc::clone(&store));
    let mut report = IngestReport::default();
    let mut events = 0;

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: Value = serde_json::from_str(line)
            .map_err(|e| format!("line {}: {}", line_no + 1, e))?;
        let timestamp = match event_timestamp(&event, timestamp_field) {
            Some(ts) => ts,
            None => {
                warn!(line = line_no + 1, field = timestamp_field, "no event time, using now");
                Utc::now().timestamp_millis()
            }
        };
        report.merge(ingestor.record(&event, timestamp).await?);
        events += 1;
    }

    store.flush().await?;
    info!(events, written = report.written, skipped = report.skipped, "ingest complete");
    Ok(formatter.format_ingest(events, &report))
}

/// List the tables of every configured breakdown.
pub fn run_tables(config: &EngineConfig, formatter: &dyn Formatter) -> String {
    formatter.format_tables(&config.catalog.table_names(&config.period.name))
}

fn read_input(path: &Path) -> std::io::Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path)
    }
}

/// Event time in epoch milliseconds, from a number or an RFC 3339 string.
fn event_timestamp(event: &Value, field: &str) -> Option<i64> {
    match event.get(field)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}
