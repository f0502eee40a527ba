//! Counter ingestion.
//!
//! Each event increments one column per breakdown, filter variant, and
//! metric. Writes for one event run concurrently and are not transactional:
//! on failure some counters may already have been incremented.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::codec::{encode_column_key, encode_row_key, row_key_dimensions, PropertySource};
use crate::config::EngineConfig;
use crate::error::Error;
use crate::storage::RangeStore;

/// Outcome of recording one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Counter increments applied.
    pub written: usize,
    /// Breakdown/filter pairs skipped because a key property was missing.
    pub skipped: usize,
}

impl IngestReport {
    /// Add another report into this one.
    pub fn merge(&mut self, other: IngestReport) {
        self.written += other.written;
        self.skipped += other.skipped;
    }
}

/// One pending counter increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterWrite {
    pub table: String,
    pub row_key: String,
    pub timestamp: i64,
    pub column: String,
    pub delta: u64,
}

/// Writes event counters into a range store.
pub struct Ingestor<S: RangeStore> {
    config: Arc<EngineConfig>,
    store: Arc<S>,
}

impl<S: RangeStore> Ingestor<S> {
    /// Create a new ingestor.
    pub fn new(config: Arc<EngineConfig>, store: Arc<S>) -> Self {
        Self { config, store }
    }

    /// Compute the increments an event produces, and how many
    /// breakdown/filter pairs it had to skip.
    pub fn plan_writes(&self, event: &Value, timestamp_ms: i64) -> (Vec<CounterWrite>, usize) {
        let bucket = self.config.period.bucket(timestamp_ms);
        let metrics = self.metric_deltas(event);
        let mut writes = Vec::new();
        let mut skipped = 0;

        for breakdown in self.config.catalog.breakdowns() {
            let table = breakdown.table_name(&self.config.period.name);
            let dimensions = row_key_dimensions(&breakdown.dimensions);

            for filter in breakdown.filter_variants() {
                let encoded =
                    encode_column_key(event, &filter.properties, self.config.key_encoding);
                let column = match encoded {
                    Ok(column) => column,
                    Err(e) => {
                        debug!(
                            breakdown = %breakdown.name,
                            filter = %filter.name,
                            error = %e,
                            "skipping column"
                        );
                        skipped += 1;
                        continue;
                    }
                };

                let mut missing = false;
                for (metric, delta) in &metrics {
                    match encode_row_key(event, &dimensions, &filter.name, metric) {
                        Ok(row_key) => writes.push(CounterWrite {
                            table: table.clone(),
                            row_key,
                            timestamp: bucket,
                            column: column.clone(),
                            delta: *delta,
                        }),
                        Err(e) => {
                            debug!(
                                breakdown = %breakdown.name,
                                filter = %filter.name,
                                error = %e,
                                "skipping row"
                            );
                            missing = true;
                            break;
                        }
                    }
                }
                if missing {
                    skipped += 1;
                }
            }
        }

        (writes, skipped)
    }

    /// Record an event at `timestamp_ms`.
    ///
    /// Returns the first store error after all writes have settled.
    pub async fn record(&self, event: &Value, timestamp_ms: i64) -> Result<IngestReport, Error> {
        if !event.is_object() {
            return Err(Error::InvalidRequest("event must be a JSON object".into()));
        }

        let (writes, skipped) = self.plan_writes(event, timestamp_ms);
        let results = join_all(writes.iter().map(|w| {
            self.store
                .increment(&w.table, &w.row_key, w.timestamp, &w.column, w.delta)
        }))
        .await;

        let mut first_error = None;
        for (write, result) in writes.iter().zip(results) {
            if let Err(e) = result {
                warn!(
                    table = %write.table,
                    row_key = %write.row_key,
                    error = %e,
                    "counter increment failed"
                );
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e.into());
        }

        debug!(written = writes.len(), skipped, "recorded event");
        Ok(IngestReport {
            written: writes.len(),
            skipped,
        })
    }

    /// Record an event at the current time.
    pub async fn record_now(&self, event: &Value) -> Result<IngestReport, Error> {
        self.record(event, Utc::now().timestamp_millis()).await
    }

    /// The default metric with delta one, plus each extra aggregation the
    /// event carries a non-negative numeric value for. Zero is recorded.
    fn metric_deltas(&self, event: &Value) -> Vec<(String, u64)> {
        let mut metrics = vec![(self.config.default_metric.clone(), 1)];
        for aggregation in &self.config.extra_aggregations {
            match event.property(&aggregation.property).and_then(|v| parse_delta(&v)) {
                Some(delta) => metrics.push((aggregation.name.clone(), delta)),
                _ => debug!(property = %aggregation.property, "no value for extra aggregation"),
            }
        }
        metrics
    }
}

fn parse_delta(value: &str) -> Option<u64> {
    value.parse::<u64>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v.round() as u64)
    })
}
