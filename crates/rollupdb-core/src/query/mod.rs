//! Query engine for rollupdb.
//!
//! A [`QueryRequest`] is resolved to a breakdown/filter [`Source`], its
//! timeframe to epoch bounds, and the matching row is scanned page by page
//! into a [`QuerySession`] that filters, groups, and buckets the counters.

mod engine;
mod executor;
mod pipeline;
mod request;
mod resolver;
mod session;
mod timeframe;

pub use engine::{QueryEngine, QueryPlan, QueryResponse};
pub use executor::{QueryExecutor, ScanStats};
pub use pipeline::{aggregate, filter_columns, merge_columns, AggregateValue, GroupResult};
pub use request::{Interval, Operator, QueryFilter, QueryRequest};
pub use resolver::{find_source, Source};
pub use session::{IntervalResult, QuerySession, ResultShape, SessionResult};
pub use timeframe::{
    format_timestamp, parse_timeframe, parse_timezone, Anchor, TimeRange, TimeUnit, Timeframe,
    TimeframeOutput,
};
