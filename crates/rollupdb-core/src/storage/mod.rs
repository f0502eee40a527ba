//! Range store layer for rollupdb.
//!
//! Counter rows live in an ordered key-value range store addressed by
//! `(table, row key, bucket timestamp)`. Each row holds named integer
//! columns. The [`RangeStore`] trait is the contract the query executor and
//! the ingestor depend on; [`SledStore`] and [`MemoryStore`] implement it.

mod config;
mod engine;
mod memory;

pub mod key;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use config::StorageConfig;
pub use engine::SledStore;
pub use key::CellKey;
pub use memory::MemoryStore;

/// Default number of rows returned per page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Column key to accumulated counter value, in first-seen order.
pub type ColumnMap = IndexMap<String, u64>;

/// Range store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying sled failure.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// A stored key could not be decoded.
    #[error("invalid key format")]
    InvalidKey,

    /// A stored counter could not be decoded.
    #[error("invalid counter value for column '{0}'")]
    InvalidValue(String),

    /// The continuation cursor does not belong to the query.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// Any other backend failure.
    #[error("{0}")]
    Backend(String),
}

/// One stored row: all counters of a row key within one time bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRow {
    /// Row (partition) key.
    pub key: String,
    /// Bucket start, epoch milliseconds.
    pub timestamp: i64,
    /// Numeric columns.
    pub columns: ColumnMap,
}

impl StoredRow {
    /// Create an empty row.
    pub fn new(key: impl Into<String>, timestamp: i64) -> Self {
        Self {
            key: key.into(),
            timestamp,
            columns: ColumnMap::new(),
        }
    }

    /// Set a column value.
    pub fn with_column(mut self, column: impl Into<String>, value: u64) -> Self {
        self.columns.insert(column.into(), value);
        self
    }
}

/// A range predicate: exact row key, inclusive timestamp bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    /// Table name (`<breakdown>_<period>`).
    pub table: String,
    /// Row key to match exactly.
    pub key: String,
    /// Inclusive lower bound, epoch milliseconds.
    pub start: i64,
    /// Inclusive upper bound. None means open-ended.
    pub end: Option<i64>,
}

impl RangeQuery {
    /// Create a new range query.
    pub fn new(
        table: impl Into<String>,
        key: impl Into<String>,
        start: i64,
        end: Option<i64>,
    ) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
            start,
            end,
        }
    }

    /// Check if a timestamp is within the query bounds.
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && self.end.map_or(true, |end| timestamp <= end)
    }

    /// Effective inclusive upper bound.
    pub fn upper_bound(&self) -> i64 {
        self.end.unwrap_or(i64::MAX)
    }

    /// First timestamp to scan when resuming after `cursor`.
    pub(crate) fn resume_from(&self, cursor: Option<&Cursor>) -> Result<Option<i64>, StoreError> {
        match cursor {
            None => Ok(Some(self.start)),
            Some(cursor) if cursor.key != self.key => Err(StoreError::InvalidCursor(format!(
                "cursor for '{}' used with '{}'",
                cursor.key, self.key
            ))),
            Some(cursor) => Ok(cursor
                .timestamp
                .checked_add(1)
                .map(|next| next.max(self.start))),
        }
    }
}

/// Continuation cursor: the last row returned in the previous page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    /// Row key of the last evaluated row.
    pub key: String,
    /// Timestamp of the last evaluated row.
    pub timestamp: i64,
}

impl Cursor {
    /// Cursor positioned after `row`.
    pub fn after(row: &StoredRow) -> Self {
        Self {
            key: row.key.clone(),
            timestamp: row.timestamp,
        }
    }
}

/// One page of a range query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    /// Rows in ascending timestamp order.
    pub rows: Vec<StoredRow>,
    /// Cursor for the next page. None when the range is exhausted.
    pub next: Option<Cursor>,
}

/// Ordered key-value range store holding counter rows.
///
/// Implementations must return rows of one row key in ascending timestamp
/// order and must make `increment` atomic per column.
#[async_trait]
pub trait RangeStore: Send + Sync {
    /// Fetch one page of rows matching `query`, resuming after `cursor`.
    async fn query_page(
        &self,
        query: &RangeQuery,
        cursor: Option<&Cursor>,
    ) -> Result<Page, StoreError>;

    /// Add `delta` to a column of a row, treating an absent column as zero.
    ///
    /// Returns the new column value.
    async fn increment(
        &self,
        table: &str,
        key: &str,
        timestamp: i64,
        column: &str,
        delta: u64,
    ) -> Result<u64, StoreError>;
}
