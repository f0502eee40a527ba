//! Query sessions: accumulate scanned rows and render the final result.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::storage::{ColumnMap, StoredRow};

use super::pipeline::{aggregate, filter_columns, merge_columns, AggregateValue};
use super::request::{Interval, QueryFilter};
use super::timeframe::{TimeRange, TimeframeOutput};

/// How accumulated columns are turned into a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultShape {
    /// Filters applied per column key.
    pub residual_filters: Vec<QueryFilter>,
    /// Group-by properties.
    pub group_by: Vec<String>,
    /// Properties the source's column keys were encoded with.
    pub properties: Vec<String>,
}

impl ResultShape {
    fn evaluate(&self, columns: &ColumnMap) -> AggregateValue {
        let filtered = filter_columns(columns, &self.residual_filters, &self.properties);
        aggregate(&filtered, &self.group_by, &self.properties)
    }
}

/// One bucket of an interval result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntervalResult {
    pub timeframe: TimeframeOutput,
    pub value: AggregateValue,
}

/// Final value of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SessionResult {
    Value(AggregateValue),
    Intervals(Vec<IntervalResult>),
}

/// Accumulator for a query without an interval.
#[derive(Debug, Clone)]
pub struct SingleValueSession {
    shape: ResultShape,
    columns: ColumnMap,
}

/// Accumulator for a query bucketed by interval.
#[derive(Debug, Clone)]
pub struct IntervalSession {
    shape: ResultShape,
    interval: Interval,
    buckets: BTreeMap<i64, ColumnMap>,
}

/// Result accumulator, chosen by whether the query asks for an interval.
#[derive(Debug, Clone)]
pub enum QuerySession {
    SingleValue(SingleValueSession),
    Interval(IntervalSession),
}

impl QuerySession {
    /// Create the session matching `interval`.
    pub fn new(shape: ResultShape, interval: Option<Interval>) -> Self {
        match interval {
            None => QuerySession::SingleValue(SingleValueSession {
                shape,
                columns: ColumnMap::new(),
            }),
            Some(interval) => QuerySession::Interval(IntervalSession {
                shape,
                interval,
                buckets: BTreeMap::new(),
            }),
        }
    }

    /// Fold a page of rows into the session.
    pub fn add_rows(&mut self, rows: &[StoredRow]) {
        match self {
            QuerySession::SingleValue(session) => {
                for row in rows {
                    merge_columns(&mut session.columns, &row.columns);
                }
            }
            QuerySession::Interval(session) => {
                for row in rows {
                    let bucket = session.interval.bucket(row.timestamp);
                    merge_columns(session.buckets.entry(bucket).or_default(), &row.columns);
                }
            }
        }
    }

    /// Render the result. Calling this does not consume or alter the session.
    pub fn result(&self) -> SessionResult {
        match self {
            QuerySession::SingleValue(session) => {
                SessionResult::Value(session.shape.evaluate(&session.columns))
            }
            QuerySession::Interval(session) => {
                let size = session.interval.size_ms();
                SessionResult::Intervals(
                    session
                        .buckets
                        .iter()
                        .map(|(start, columns)| IntervalResult {
                            timeframe: TimeRange {
                                start: *start,
                                end: Some(start.saturating_add(size)),
                            }
                            .into(),
                            value: session.shape.evaluate(columns),
                        })
                        .collect(),
                )
            }
        }
    }
}
