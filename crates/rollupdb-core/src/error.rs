//! Core error types.

use thiserror::Error;

use crate::storage::StoreError;

/// Message surfaced when no breakdown can answer a query.
pub const SOURCE_NOT_FOUND_MESSAGE: &str = "A source for this request could not be found.";

/// Core engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The timeframe expression does not follow `(this|prev)_[N_]unit`.
    #[error("invalid timeframe: {0}")]
    InvalidTimeframe(String),

    /// The timezone is not a known IANA zone name.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// No breakdown/filter pair in the catalog matches the query shape.
    #[error("{}", SOURCE_NOT_FOUND_MESSAGE)]
    SourceNotFound,

    /// Range store failure while scanning or incrementing.
    #[error("range store error: {0}")]
    Store(#[from] StoreError),

    /// A key property had no value when building a row or column key.
    #[error("missing value for key property '{0}'")]
    KeyEncoding(String),

    /// The query request is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The engine configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Reading a configuration file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The caller cancelled the query.
    #[error("query cancelled")]
    Cancelled,

    /// The query did not finish within its deadline.
    #[error("query timed out after {0} ms")]
    Timeout(u64),
}
