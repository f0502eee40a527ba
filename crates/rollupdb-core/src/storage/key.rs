//! Order-preserving cell key encoding for the sled store.

use std::fmt;

/// Size of the row-key length prefix in bytes.
const LEN_SIZE: usize = 4;

/// Size of the bucket timestamp in bytes.
pub const TIMESTAMP_SIZE: usize = 8;

/// A single counter cell: one column of one row in one time bucket.
///
/// Key format: `[row_key_len (4 bytes, big-endian)][row_key][timestamp (8 bytes)][column]`
///
/// The timestamp is stored big-endian with its sign bit flipped so that
/// lexicographic order matches numeric order, including negative values.
/// All cells of a row key are contiguous, ordered by timestamp, then column.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CellKey {
    /// Row (partition) key.
    pub row_key: String,
    /// Bucket timestamp, epoch milliseconds.
    pub timestamp: i64,
    /// Column key.
    pub column: String,
}

impl CellKey {
    /// Create a new cell key.
    pub fn new(row_key: impl Into<String>, timestamp: i64, column: impl Into<String>) -> Self {
        Self {
            row_key: row_key.into(),
            timestamp,
            column: column.into(),
        }
    }

    /// Encode the key to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Self::row_bound(&self.row_key, self.timestamp);
        buf.extend_from_slice(self.column.as_bytes());
        buf
    }

    /// Decode a key from bytes.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < LEN_SIZE {
            return None;
        }
        let mut len_bytes = [0u8; LEN_SIZE];
        len_bytes.copy_from_slice(&bytes[..LEN_SIZE]);
        let row_len = u32::from_be_bytes(len_bytes) as usize;

        let ts_start = LEN_SIZE.checked_add(row_len)?;
        let column_start = ts_start.checked_add(TIMESTAMP_SIZE)?;
        if bytes.len() < column_start {
            return None;
        }

        let row_key = std::str::from_utf8(&bytes[LEN_SIZE..ts_start]).ok()?;
        let mut ts_bytes = [0u8; TIMESTAMP_SIZE];
        ts_bytes.copy_from_slice(&bytes[ts_start..column_start]);
        let column = std::str::from_utf8(&bytes[column_start..]).ok()?;

        Some(Self {
            row_key: row_key.to_string(),
            timestamp: decode_timestamp(ts_bytes),
            column: column.to_string(),
        })
    }

    /// Prefix shared by every cell of a row key.
    pub fn row_prefix(row_key: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(LEN_SIZE + row_key.len() + TIMESTAMP_SIZE);
        buf.extend_from_slice(&(row_key.len() as u32).to_be_bytes());
        buf.extend_from_slice(row_key.as_bytes());
        buf
    }

    /// Smallest key of a row key at the given timestamp.
    pub fn row_bound(row_key: &str, timestamp: i64) -> Vec<u8> {
        let mut buf = Self::row_prefix(row_key);
        buf.extend_from_slice(&encode_timestamp(timestamp));
        buf
    }
}

impl fmt::Debug for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellKey")
            .field("row_key", &self.row_key)
            .field("timestamp", &self.timestamp)
            .field("column", &self.column)
            .finish()
    }
}

fn encode_timestamp(timestamp: i64) -> [u8; TIMESTAMP_SIZE] {
    ((timestamp as u64) ^ (1 << 63)).to_be_bytes()
}

fn decode_timestamp(bytes: [u8; TIMESTAMP_SIZE]) -> i64 {
    (u64::from_be_bytes(bytes) ^ (1 << 63)) as i64
}

/// Encode a counter value.
pub fn encode_counter(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Decode a counter value. None if the bytes are not a counter.
pub fn decode_counter(bytes: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}
