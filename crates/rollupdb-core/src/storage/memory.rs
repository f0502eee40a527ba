//! In-memory range store.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{
    ColumnMap, Cursor, Page, RangeQuery, RangeStore, StoreError, StoredRow, DEFAULT_PAGE_SIZE,
};

type Table = BTreeMap<(String, i64), ColumnMap>;

/// Range store held entirely in memory.
///
/// Follows the same paging contract as [`super::SledStore`]; useful for
/// tests and for embedding without a data directory.
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store with the default page size.
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create an empty store returning at most `page_size` rows per page.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            page_size: page_size.max(1),
        }
    }

    /// Insert or replace a whole row.
    pub fn put_row(&self, table: &str, row: StoredRow) {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .insert((row.key, row.timestamp), row.columns);
    }

    /// Number of rows in a table.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl RangeStore for MemoryStore {
    async fn query_page(
        &self,
        query: &RangeQuery,
        cursor: Option<&Cursor>,
    ) -> Result<Page, StoreError> {
        let Some(from) = query.resume_from(cursor)? else {
            return Ok(Page::default());
        };
        let upper = query.upper_bound();
        if from > upper {
            return Ok(Page::default());
        }

        let tables = self.tables.read();
        let Some(table) = tables.get(&query.table) else {
            return Ok(Page::default());
        };

        let range = (
            Bound::Included((query.key.clone(), from)),
            Bound::Included((query.key.clone(), upper)),
        );
        let mut matched = table.range(range);
        let rows: Vec<StoredRow> = matched
            .by_ref()
            .take(self.page_size)
            .map(|((key, timestamp), columns)| StoredRow {
                key: key.clone(),
                timestamp: *timestamp,
                columns: columns.clone(),
            })
            .collect();
        let next = match matched.next() {
            Some(_) => rows.last().map(Cursor::after),
            None => None,
        };
        Ok(Page { rows, next })
    }

    async fn increment(
        &self,
        table: &str,
        key: &str,
        timestamp: i64,
        column: &str,
        delta: u64,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.write();
        let counter = tables
            .entry(table.to_string())
            .or_default()
            .entry((key.to_string(), timestamp))
            .or_default()
            .entry(column.to_string())
            .or_insert(0);
        *counter = counter.saturating_add(delta);
        Ok(*counter)
    }
}
