//! Column filtering and aggregation over decoded column keys.

use indexmap::IndexMap;
use serde::Serialize;
use tracing::trace;

use crate::codec::{decode_column_key, encode_column_key, DecodedKey};
use crate::config::KeyEncoding;
use crate::storage::ColumnMap;

use super::request::QueryFilter;

/// Aggregated counter value: a scalar total or per-group totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AggregateValue {
    Total(u64),
    Groups(Vec<GroupResult>),
}

impl AggregateValue {
    /// Sum over all groups.
    pub fn total(&self) -> u64 {
        match self {
            AggregateValue::Total(total) => *total,
            AggregateValue::Groups(groups) => {
                groups.iter().fold(0, |acc, g| acc.saturating_add(g.result))
            }
        }
    }
}

/// One group of a grouped aggregate, e.g. `{"unit_domain": "foo.com", "result": 5}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupResult {
    #[serde(flatten)]
    pub fields: DecodedKey,
    pub result: u64,
}

/// Keep the columns whose decoded key satisfies every filter.
///
/// Columns that do not decode against `properties` never match.
pub fn filter_columns(
    columns: &ColumnMap,
    filters: &[QueryFilter],
    properties: &[String],
) -> ColumnMap {
    if filters.is_empty() {
        return columns.clone();
    }

    columns
        .iter()
        .filter(|(key, _)| match decode_column_key(key, properties) {
            Some(decoded) => filters.iter().all(|f| {
                let actual = decoded.get(&f.property_name).map(String::as_str);
                f.operator.matches(actual, &f.property_value)
            }),
            None => {
                trace!(column = %key, "undecodable column dropped by filter");
                false
            }
        })
        .map(|(key, value)| (key.clone(), *value))
        .collect()
}

/// Sum column values, optionally grouped by a subset of `properties`.
///
/// Groups come back in the order their first column was seen.
pub fn aggregate(
    columns: &ColumnMap,
    group_by: &[String],
    properties: &[String],
) -> AggregateValue {
    if group_by.is_empty() {
        return AggregateValue::Total(sum_values(columns.values().copied()));
    }

    let mut groups: IndexMap<String, u64> = IndexMap::new();
    for (key, value) in columns {
        let Some(decoded) = decode_column_key(key, properties) else {
            trace!(column = %key, "undecodable column skipped in aggregate");
            continue;
        };
        let Ok(group_key) = encode_column_key(&decoded, group_by, KeyEncoding::Lenient) else {
            continue;
        };
        let total = groups.entry(group_key).or_insert(0);
        *total = total.saturating_add(*value);
    }

    AggregateValue::Groups(
        groups
            .into_iter()
            .map(|(group_key, result)| GroupResult {
                fields: decode_column_key(&group_key, group_by).unwrap_or_default(),
                result,
            })
            .collect(),
    )
}

/// Add every column of `source` into `target`.
///
/// Columns new to `target` are appended in `source` order.
pub fn merge_columns(target: &mut ColumnMap, source: &ColumnMap) {
    for (key, value) in source {
        let total = target.entry(key.clone()).or_insert(0);
        *total = total.saturating_add(*value);
    }
}

fn sum_values(values: impl Iterator<Item = u64>) -> u64 {
    values.fold(0, u64::saturating_add)
}
