//! Row and column key encoding.
//!
//! The write path and the read path must agree byte-for-byte on these keys:
//!
//! - row key: `v1|v2|...|event_name` + `_` + filter name + `_` + metric
//! - column key: `"all"` for the null filter, else `p1|p2|...` in the
//!   filter's declared property order
//!
//! # Precondition
//!
//! No encoded value may contain [`KEY_DELIM`]. The codec does not escape or
//! check for it: a value containing `|` shifts every following segment when
//! the key is decoded, and decoding then yields wrong values or fails the
//! segment-count check.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use serde_json::Value;

use crate::config::KeyEncoding;
use crate::error::Error;

/// Separator between values inside a row or column key.
pub const KEY_DELIM: char = '|';

/// Separator between the value part, filter name, and metric of a row key.
pub const ROW_KEY_SEPARATOR: char = '_';

/// Column key of the null filter.
pub const ALL_COLUMN: &str = "all";

/// Event field holding the event name; always the last row-key segment.
pub const EVENT_NAME_FIELD: &str = "event_name";

/// Decoded column key: property name to value.
pub type DecodedKey = BTreeMap<String, String>;

/// Anything property values can be read from by name.
pub trait PropertySource {
    /// Look up a property value. `None` means absent.
    fn property(&self, name: &str) -> Option<Cow<'_, str>>;
}

impl<S: BuildHasher> PropertySource for HashMap<String, String, S> {
    fn property(&self, name: &str) -> Option<Cow<'_, str>> {
        self.get(name).map(|v| Cow::Borrowed(v.as_str()))
    }
}

impl PropertySource for BTreeMap<String, String> {
    fn property(&self, name: &str) -> Option<Cow<'_, str>> {
        self.get(name).map(|v| Cow::Borrowed(v.as_str()))
    }
}

/// JSON events resolve dotted paths (`ip_geo_info.country`) through nested
/// objects. A literal top-level key wins over the nested lookup, and
/// `list.length` on an array yields its length.
impl PropertySource for Value {
    fn property(&self, name: &str) -> Option<Cow<'_, str>> {
        if let Some(value) = self.get(name) {
            return scalar_to_str(value);
        }
        let mut current = self;
        let mut segments = name.split('.').peekable();
        while let Some(segment) = segments.next() {
            let is_last = segments.peek().is_none();
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) if segment == "length" && is_last => {
                    return Some(Cow::Owned(items.len().to_string()));
                }
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        scalar_to_str(current)
    }
}

fn scalar_to_str(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Encode a row key.
///
/// Fails with [`Error::KeyEncoding`] if any dimension is absent or empty;
/// such a row cannot exist and the caller must skip it.
pub fn encode_row_key<P, S>(
    values: &P,
    dimensions: &[S],
    filter_name: &str,
    metric: &str,
) -> Result<String, Error>
where
    P: PropertySource + ?Sized,
    S: AsRef<str>,
{
    let mut parts = Vec::with_capacity(dimensions.len());
    for dimension in dimensions {
        let dimension = dimension.as_ref();
        match values.property(dimension) {
            Some(value) if !value.is_empty() => parts.push(value),
            _ => return Err(Error::KeyEncoding(dimension.to_string())),
        }
    }

    let mut key = join_values(&parts);
    key.push(ROW_KEY_SEPARATOR);
    key.push_str(filter_name);
    key.push(ROW_KEY_SEPARATOR);
    key.push_str(metric);
    Ok(key)
}

/// Encode a column key.
///
/// Returns [`ALL_COLUMN`] when `properties` is empty. In lenient mode a
/// missing value becomes an empty segment; in strict mode it fails like
/// [`encode_row_key`].
pub fn encode_column_key<P, S>(
    values: &P,
    properties: &[S],
    encoding: KeyEncoding,
) -> Result<String, Error>
where
    P: PropertySource + ?Sized,
    S: AsRef<str>,
{
    if properties.is_empty() {
        return Ok(ALL_COLUMN.to_string());
    }

    let mut parts = Vec::with_capacity(properties.len());
    for property in properties {
        let property = property.as_ref();
        match (values.property(property), encoding) {
            (Some(value), _) => parts.push(value),
            (None, KeyEncoding::Lenient) => parts.push(Cow::Borrowed("")),
            (None, KeyEncoding::Strict) => return Err(Error::KeyEncoding(property.to_string())),
        }
    }
    Ok(join_values(&parts))
}

/// Decode a column key against the property list it was encoded with.
///
/// Returns `None` when the segment count does not match the property count.
pub fn decode_column_key<S: AsRef<str>>(key: &str, properties: &[S]) -> Option<DecodedKey> {
    if properties.is_empty() {
        return (key == ALL_COLUMN).then(DecodedKey::new);
    }

    let parts: Vec<&str> = key.split(KEY_DELIM).collect();
    if parts.len() != properties.len() {
        return None;
    }
    Some(
        properties
            .iter()
            .zip(parts)
            .map(|(name, value)| (name.as_ref().to_string(), value.to_string()))
            .collect(),
    )
}

/// Row-key dimensions for a breakdown: its dimensions plus the event name.
pub fn row_key_dimensions(dimensions: &[String]) -> Vec<&str> {
    dimensions
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(EVENT_NAME_FIELD))
        .collect()
}

fn join_values(parts: &[Cow<'_, str>]) -> String {
    let mut out = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push(KEY_DELIM);
        }
        out.push_str(part);
    }
    out
}
