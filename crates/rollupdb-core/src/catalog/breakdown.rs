//! Breakdown and filter definitions.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Name of the implicit filter variant that stores a single `"all"` column.
pub const NULL_FILTER_NAME: &str = "all";

/// A column-encoding variant of a breakdown.
///
/// The ordered `properties` are packed into the column key of every row
/// written under this filter. Order is part of the key contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDef {
    /// Suffix distinguishing this row-key family.
    pub name: String,
    /// Ordered property names encoded into the column key.
    #[serde(default)]
    pub properties: Vec<String>,
}

impl FilterDef {
    /// Create a new filter definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    /// The null filter: no column properties, single implicit column.
    pub fn null() -> Self {
        Self::new(NULL_FILTER_NAME)
    }

    /// Add a column property.
    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.properties.push(property.into());
        self
    }

    /// Add multiple column properties.
    pub fn with_properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties.extend(properties.into_iter().map(Into::into));
        self
    }

    /// Check if this is the null filter.
    pub fn is_null(&self) -> bool {
        self.name == NULL_FILTER_NAME && self.properties.is_empty()
    }

    /// Check if a property is decodable from this filter's column keys.
    pub fn has_property(&self, property: &str) -> bool {
        self.properties.iter().any(|p| p == property)
    }
}

/// A precomputed table descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownDef {
    /// Table identifier (without the period suffix).
    pub name: String,
    /// Ordered field names encoded into the row key.
    pub dimensions: Vec<String>,
    /// Column-encoding variants, in resolution order.
    #[serde(default)]
    pub filters: Vec<FilterDef>,
}

impl BreakdownDef {
    /// Create a new breakdown definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dimensions: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// Add a row-key dimension.
    pub fn with_dimension(mut self, dimension: impl Into<String>) -> Self {
        self.dimensions.push(dimension.into());
        self
    }

    /// Add multiple row-key dimensions.
    pub fn with_dimensions<I, S>(mut self, dimensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dimensions.extend(dimensions.into_iter().map(Into::into));
        self
    }

    /// Add a filter variant.
    pub fn with_filter(mut self, filter: FilterDef) -> Self {
        self.filters.push(filter);
        self
    }

    /// Check if a property is one of the row-key dimensions.
    pub fn has_dimension(&self, property: &str) -> bool {
        self.dimensions.iter().any(|d| d == property)
    }

    /// Get a filter variant by name. The null filter is always available.
    pub fn get_filter(&self, name: &str) -> Option<Cow<'_, FilterDef>> {
        if name == NULL_FILTER_NAME {
            return Some(Cow::Owned(FilterDef::null()));
        }
        self.filters.iter().find(|f| f.name == name).map(Cow::Borrowed)
    }

    /// All filter variants in resolution and write order: null filter first.
    pub fn filter_variants(&self) -> impl Iterator<Item = Cow<'_, FilterDef>> {
        std::iter::once(Cow::Owned(FilterDef::null()))
            .chain(self.filters.iter().map(Cow::Borrowed))
    }

    /// Range-store table name for this breakdown at the given period.
    pub fn table_name(&self, period_name: &str) -> String {
        format!("{}_{}", self.name, period_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_variants_start_with_null() {
        let breakdown = BreakdownDef::new("publisher_metrics")
            .with_dimensions(["unit_environment", "unit_pbid"])
            .with_filter(FilterDef::new("geo").with_property("ip_geo_info.country"));

        let names: Vec<String> = breakdown
            .filter_variants()
            .map(|f| f.name.clone())
            .collect();
        assert_eq!(names, vec!["all", "geo"]);
        assert!(breakdown.filter_variants().next().unwrap().is_null());
    }

    #[test]
    fn test_table_name() {
        let breakdown = BreakdownDef::new("publisher_metrics");
        assert_eq!(breakdown.table_name("hourly"), "publisher_metrics_hourly");
    }

    #[test]
    fn test_get_filter() {
        let breakdown = BreakdownDef::new("video_performance")
            .with_filter(FilterDef::new("geo").with_property("country"));

        assert!(breakdown.get_filter("all").unwrap().is_null());
        assert_eq!(breakdown.get_filter("geo").unwrap().properties, vec!["country"]);
        assert!(breakdown.get_filter("device").is_none());
    }

    #[test]
    fn test_deserialize_without_filters() {
        let breakdown: BreakdownDef = serde_json::from_str(
            r#"{"name": "video_performance", "dimensions": ["video_id", "unit_domain"]}"#,
        )
        .unwrap();
        assert!(breakdown.filters.is_empty());
        assert!(breakdown.has_dimension("video_id"));
        assert!(!breakdown.has_dimension("unit_pbid"));
    }
}
