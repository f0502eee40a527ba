//! Paginated range scans.
//!
//! The executor drives a [`RangeStore`] page by page, handing each page to a
//! caller-supplied sink. Pages are requested strictly in order; the next
//! request is only issued once the previous page has been consumed.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Error;
use crate::storage::{Cursor, RangeQuery, RangeStore, StoreError, StoredRow};

/// Counters collected while scanning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Pages fetched, including a final empty page.
    pub pages: usize,
    /// Rows delivered to the sink.
    pub rows: usize,
}

/// Executor for paginated range queries.
pub struct QueryExecutor<'a, S: RangeStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: RangeStore + ?Sized> QueryExecutor<'a, S> {
    /// Create a new executor over a store.
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Scan every row matching `query`, feeding pages to `on_page` in order.
    ///
    /// Cancellation is checked before each page request and while a request
    /// is in flight.
    pub async fn scan<F>(
        &self,
        query: &RangeQuery,
        cancel: &CancellationToken,
        mut on_page: F,
    ) -> Result<ScanStats, Error>
    where
        F: FnMut(&[StoredRow]),
    {
        let mut stats = ScanStats::default();
        let mut cursor: Option<Cursor> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                page = self.store.query_page(query, cursor.as_ref()) => page?,
            };

            stats.pages += 1;
            stats.rows += page.rows.len();
            debug!(
                table = %query.table,
                key = %query.key,
                page = stats.pages,
                rows = page.rows.len(),
                "scanned page"
            );
            on_page(&page.rows);

            match page.next {
                Some(next) if cursor.as_ref() == Some(&next) => {
                    return Err(StoreError::InvalidCursor(format!(
                        "cursor did not advance past {}",
                        next.timestamp
                    ))
                    .into());
                }
                Some(next) => cursor = Some(next),
                None => return Ok(stats),
            }
        }
    }

    /// Scan and collect every matching row.
    pub async fn collect(
        &self,
        query: &RangeQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredRow>, Error> {
        let mut rows = Vec::new();
        self.scan(query, cancel, |page| rows.extend_from_slice(page)).await?;
        Ok(rows)
    }
}
