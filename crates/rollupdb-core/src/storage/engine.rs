//! sled-backed range store.

use async_trait::async_trait;
use sled::{Db, Tree};

use super::key::{decode_counter, encode_counter, CellKey};
use super::{Cursor, Page, RangeQuery, RangeStore, StorageConfig, StoreError, StoredRow};

/// Tree sled creates for itself; never a rollup table.
const DEFAULT_TREE: &[u8] = b"__sled__default";

/// Persistent range store wrapping sled.
///
/// Every table is a sled tree. Every counter cell is one entry keyed by
/// [`CellKey`], so a row is the run of consecutive entries sharing a row key
/// and timestamp.
pub struct SledStore {
    /// The underlying sled database.
    db: Db,

    /// Maximum rows per page.
    page_size: usize,
}

impl SledStore {
    /// Open or create a store with the given configuration.
    pub fn open(config: StorageConfig) -> Result<Self, StoreError> {
        let db = config.to_sled_config().open()?;
        tracing::debug!(
            path = %config.path.display(),
            temporary = config.temporary,
            recovered = db.was_recovered(),
            "range store opened"
        );
        Ok(Self {
            db,
            page_size: config.page_size.max(1),
        })
    }

    /// Check if the database was recovered from a previous run.
    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    /// Names of all tables that hold data.
    pub fn table_names(&self) -> Vec<String> {
        self.db
            .tree_names()
            .into_iter()
            .filter(|name| &**name != DEFAULT_TREE)
            .filter_map(|name| String::from_utf8(name.to_vec()).ok())
            .collect()
    }

    /// Flush all pending writes to disk.
    pub async fn flush(&self) -> Result<usize, StoreError> {
        Ok(self.db.flush_async().await?)
    }

    fn tree(&self, table: &str) -> Result<Tree, StoreError> {
        Ok(self.db.open_tree(table)?)
    }

    /// Open a table only if it already exists. Reads never create trees.
    fn existing_tree(&self, table: &str) -> Result<Option<Tree>, StoreError> {
        let exists = self
            .db
            .tree_names()
            .iter()
            .any(|name| &**name == table.as_bytes());
        if exists {
            self.tree(table).map(Some)
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl RangeStore for SledStore {
    async fn query_page(
        &self,
        query: &RangeQuery,
        cursor: Option<&Cursor>,
    ) -> Result<Page, StoreError> {
        let Some(from) = query.resume_from(cursor)? else {
            return Ok(Page::default());
        };
        if from > query.upper_bound() {
            return Ok(Page::default());
        }

        let Some(tree) = self.existing_tree(&query.table)? else {
            return Ok(Page::default());
        };
        let query = query.clone();
        let page_size = self.page_size;
        tokio::task::spawn_blocking(move || scan_page(&tree, &query, from, page_size))
            .await
            .map_err(|e| StoreError::Backend(format!("scan task failed: {}", e)))?
    }

    async fn increment(
        &self,
        table: &str,
        key: &str,
        timestamp: i64,
        column: &str,
        delta: u64,
    ) -> Result<u64, StoreError> {
        let tree = self.tree(table)?;
        let cell = CellKey::new(key, timestamp, column);
        tokio::task::spawn_blocking(move || increment_cell(&tree, &cell, delta))
            .await
            .map_err(|e| StoreError::Backend(format!("increment task failed: {}", e)))?
    }
}

/// Read up to `page_size` rows of `query.key` starting at timestamp `from`.
fn scan_page(
    tree: &Tree,
    query: &RangeQuery,
    from: i64,
    page_size: usize,
) -> Result<Page, StoreError> {
    let prefix = CellKey::row_prefix(&query.key);
    let lower = CellKey::row_bound(&query.key, from);
    let upper = query.upper_bound();
    let mut rows: Vec<StoredRow> = Vec::new();

    for item in tree.range(lower..) {
        let (key_bytes, value_bytes) = item?;
        if !key_bytes.starts_with(&prefix) {
            break;
        }
        let cell = CellKey::decode(&key_bytes).ok_or(StoreError::InvalidKey)?;
        if cell.timestamp > upper {
            break;
        }
        let value = decode_counter(&value_bytes)
            .ok_or_else(|| StoreError::InvalidValue(cell.column.clone()))?;

        match rows.last_mut() {
            Some(row) if row.timestamp == cell.timestamp => {
                row.columns.insert(cell.column, value);
            }
            _ => {
                if rows.len() == page_size {
                    // A further row exists: hand back a cursor for it
                    let next = rows.last().map(Cursor::after);
                    return Ok(Page { rows, next });
                }
                rows.push(
                    StoredRow::new(query.key.clone(), cell.timestamp)
                        .with_column(cell.column, value),
                );
            }
        }
    }

    tracing::trace!(
        table = %query.table,
        key = %query.key,
        rows = rows.len(),
        "final page scanned"
    );
    Ok(Page { rows, next: None })
}

/// Atomically add `delta` to a cell, treating an absent cell as zero.
fn increment_cell(tree: &Tree, cell: &CellKey, delta: u64) -> Result<u64, StoreError> {
    let key = cell.encode();
    loop {
        let current = tree.get(&key)?;
        let old = match &current {
            Some(bytes) => {
                decode_counter(bytes).ok_or_else(|| StoreError::InvalidValue(cell.column.clone()))?
            }
            None => 0,
        };
        let new = old.saturating_add(delta);
        match tree.compare_and_swap(&key, current, Some(encode_counter(new).to_vec()))? {
            Ok(()) => return Ok(new),
            // Lost a race with a concurrent increment; retry on the fresh value
            Err(_) => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(page_size: usize) -> SledStore {
        SledStore::open(StorageConfig::temporary().with_page_size(page_size)).unwrap()
    }

    #[tokio::test]
    async fn test_increment_defaults_to_zero() {
        let store = open(10);
        assert_eq!(store.increment("t_hourly", "k", 0, "US", 1).await.unwrap(), 1);
        assert_eq!(store.increment("t_hourly", "k", 0, "US", 4).await.unwrap(), 5);
        assert_eq!(store.increment("t_hourly", "k", 0, "DE", 2).await.unwrap(), 2);

        let page = store
            .query_page(&RangeQuery::new("t_hourly", "k", 0, None), None)
            .await
            .unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].columns["US"], 5);
        assert_eq!(page.rows[0].columns["DE"], 2);
        assert!(page.next.is_none());
    }

    #[tokio::test]
    async fn test_range_bounds_and_key_isolation() {
        let store = open(10);
        for ts in [100, 200, 300] {
            store.increment("t", "a", ts, "all", 1).await.unwrap();
        }
        store.increment("t", "ab", 200, "all", 7).await.unwrap();

        let page = store
            .query_page(&RangeQuery::new("t", "a", 150, Some(300)), None)
            .await
            .unwrap();
        let timestamps: Vec<i64> = page.rows.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![200, 300]);
        assert!(page.rows.iter().all(|r| r.key == "a" && r.columns["all"] == 1));
    }

    #[tokio::test]
    async fn test_pagination() {
        let store = open(2);
        for ts in [100, 200, 300, 400, 500] {
            store.increment("t", "k", ts, "x", ts as u64).await.unwrap();
            store.increment("t", "k", ts, "y", 1).await.unwrap();
        }
        let query = RangeQuery::new("t", "k", 0, None);

        let mut cursor = None;
        let mut pages = Vec::new();
        loop {
            let page = store.query_page(&query, cursor.as_ref()).await.unwrap();
            pages.push(page.rows.iter().map(|r| r.timestamp).collect::<Vec<_>>());
            assert!(page.rows.iter().all(|r| r.columns.len() == 2));
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(pages, vec![vec![100, 200], vec![300, 400], vec![500]]);
    }

    #[tokio::test]
    async fn test_concurrent_increments() {
        let store = std::sync::Arc::new(open(10));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    store.increment("t", "k", 0, "all", 1).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let page = store
            .query_page(&RangeQuery::new("t", "k", 0, Some(0)), None)
            .await
            .unwrap();
        assert_eq!(page.rows[0].columns["all"], 200);
    }

    #[tokio::test]
    async fn test_table_names() {
        let store = open(10);
        store.increment("video_performance_hourly", "k", 0, "all", 1).await.unwrap();
        assert_eq!(store.table_names(), vec!["video_performance_hourly".to_string()]);
    }

    #[tokio::test]
    async fn test_query_unknown_table_is_empty() {
        let store = open(10);
        store.increment("video_performance_hourly", "k", 0, "all", 1).await.unwrap();

        let page = store
            .query_page(&RangeQuery::new("missing_hourly", "k", 0, None), None)
            .await
            .unwrap();
        assert_eq!(page, Page::default());
        assert_eq!(store.table_names(), vec!["video_performance_hourly".to_string()]);
    }
}
