//! rollupdb Core - Rollup catalog, counter storage, and query evaluation.
//!
//! Events are pre-aggregated into counters keyed by breakdown dimensions and
//! bucketed by period. Queries are answered by finding the breakdown that
//! covers their filters and groupings, then scanning and aggregating its rows.

pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod ingest;
pub mod query;
pub mod storage;

pub use catalog::{BreakdownDef, Catalog, FilterDef, NULL_FILTER_NAME};
pub use config::{EngineConfig, ExtraAggregation, KeyEncoding, PeriodConfig};
pub use error::{Error, SOURCE_NOT_FOUND_MESSAGE};
pub use ingest::{CounterWrite, IngestReport, Ingestor};
pub use query::{
    AggregateValue, Interval, Operator, QueryEngine, QueryFilter, QueryRequest, QueryResponse,
    SessionResult,
};
pub use storage::{
    Cursor, MemoryStore, Page, RangeQuery, RangeStore, SledStore, StorageConfig, StoreError,
    StoredRow,
};
