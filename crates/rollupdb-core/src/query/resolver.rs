//! Source resolution: pick the breakdown and filter variant that can answer
//! a query.

use std::collections::BTreeMap;

use tracing::trace;

use crate::catalog::{BreakdownDef, Catalog, FilterDef};
use crate::codec::{encode_row_key, row_key_dimensions, EVENT_NAME_FIELD};
use crate::error::Error;

use super::request::QueryFilter;

/// A breakdown paired with the filter variant whose column keys hold the
/// properties a query needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Breakdown whose dimensions form the row key.
    pub breakdown: BreakdownDef,
    /// Filter variant whose properties form the column keys.
    pub filter: FilterDef,
}

impl Source {
    /// Table holding this source's rows for a storage period.
    pub fn table_name(&self, period_name: &str) -> String {
        self.breakdown.table_name(period_name)
    }

    /// Row key addressed by the query's equality filters.
    ///
    /// Requests are validated to carry at most one equality value per property.
    pub fn row_key(
        &self,
        filters: &[QueryFilter],
        event_name: &str,
        metric: &str,
    ) -> Result<String, Error> {
        let mut values = BTreeMap::new();
        for filter in filters.iter().filter(|f| f.is_eq()) {
            values
                .entry(filter.property_name.clone())
                .or_insert_with(|| filter.property_value.clone());
        }
        values.insert(EVENT_NAME_FIELD.to_string(), event_name.to_string());

        encode_row_key(
            &values,
            &row_key_dimensions(&self.breakdown.dimensions),
            &self.filter.name,
            metric,
        )
    }

    /// Filters not satisfied by the row key, to be applied per column.
    pub fn residual_filters(&self, filters: &[QueryFilter]) -> Vec<QueryFilter> {
        filters
            .iter()
            .filter(|f| !self.breakdown.has_dimension(&f.property_name))
            .cloned()
            .collect()
    }
}

/// Find the first breakdown/filter pair able to answer a query.
///
/// A pair qualifies when every breakdown dimension is pinned by an equality
/// filter, and the filter variant carries every other filtered property and
/// every group-by property. An inequality filter on a dimension still needs
/// the property in the column key. Breakdowns are tried in catalog order and the
/// null filter before the named ones.
pub fn find_source(
    catalog: &Catalog,
    filters: &[QueryFilter],
    group_by: &[String],
) -> Result<Source, Error> {
    let eq_properties: Vec<&str> = filters
        .iter()
        .filter(|f| f.is_eq())
        .map(|f| f.property_name.as_str())
        .collect();

    for breakdown in catalog.breakdowns() {
        if !breakdown
            .dimensions
            .iter()
            .all(|d| eq_properties.contains(&d.as_str()))
        {
            continue;
        }

        // Equality filters beyond the row key, every non-equality filter, and
        // the group-by list must all be decodable from the column key.
        let other_properties: Vec<&str> = filters
            .iter()
            .filter(|f| !f.is_eq() || !breakdown.has_dimension(&f.property_name))
            .map(|f| f.property_name.as_str())
            .collect();

        for filter in breakdown.filter_variants() {
            let covers = other_properties
                .iter()
                .copied()
                .chain(group_by.iter().map(String::as_str))
                .all(|p| filter.has_property(p));
            if covers {
                trace!(breakdown = %breakdown.name, filter = %filter.name, "resolved source");
                return Ok(Source {
                    breakdown: breakdown.clone(),
                    filter: filter.into_owned(),
                });
            }
        }
    }

    Err(Error::SourceNotFound)
}
