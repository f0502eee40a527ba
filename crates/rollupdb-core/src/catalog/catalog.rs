//! Validated, read-only breakdown catalog.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{BreakdownDef, NULL_FILTER_NAME};
use crate::error::Error;

/// The static catalog of precomputed breakdowns.
///
/// Catalog order is significant: source resolution returns the first
/// breakdown that can answer a query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<BreakdownDef>", into = "Vec<BreakdownDef>")]
pub struct Catalog {
    breakdowns: Vec<BreakdownDef>,
}

impl Catalog {
    /// Build a catalog, validating every breakdown.
    pub fn new(breakdowns: Vec<BreakdownDef>) -> Result<Self, Error> {
        let mut names = HashSet::new();
        for breakdown in &breakdowns {
            validate_breakdown(breakdown)?;
            if !names.insert(breakdown.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate breakdown '{}'",
                    breakdown.name
                )));
            }
        }
        Ok(Self { breakdowns })
    }

    /// Breakdowns in catalog order.
    pub fn breakdowns(&self) -> &[BreakdownDef] {
        &self.breakdowns
    }

    /// Get a breakdown by name.
    pub fn get_breakdown(&self, name: &str) -> Option<&BreakdownDef> {
        self.breakdowns.iter().find(|b| b.name == name)
    }

    /// Range-store table names for every breakdown at the given period.
    pub fn table_names(&self, period_name: &str) -> Vec<String> {
        self.breakdowns
            .iter()
            .map(|b| b.table_name(period_name))
            .collect()
    }

    /// Number of breakdowns.
    pub fn len(&self) -> usize {
        self.breakdowns.len()
    }

    /// Check if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.breakdowns.is_empty()
    }
}

impl TryFrom<Vec<BreakdownDef>> for Catalog {
    type Error = Error;

    fn try_from(breakdowns: Vec<BreakdownDef>) -> Result<Self, Self::Error> {
        Self::new(breakdowns)
    }
}

impl From<Catalog> for Vec<BreakdownDef> {
    fn from(catalog: Catalog) -> Self {
        catalog.breakdowns
    }
}

fn validate_breakdown(breakdown: &BreakdownDef) -> Result<(), Error> {
    if breakdown.name.is_empty() {
        return Err(Error::Config("breakdown name must not be empty".into()));
    }
    if breakdown.dimensions.iter().any(String::is_empty) {
        return Err(Error::Config(format!(
            "breakdown '{}' has an empty dimension name",
            breakdown.name
        )));
    }

    let mut filter_names = HashSet::new();
    for filter in &breakdown.filters {
        if filter.name.is_empty() || filter.name == NULL_FILTER_NAME {
            return Err(Error::Config(format!(
                "breakdown '{}' has an invalid filter name '{}'",
                breakdown.name, filter.name
            )));
        }
        if !filter_names.insert(filter.name.as_str()) {
            return Err(Error::Config(format!(
                "breakdown '{}' has duplicate filter '{}'",
                breakdown.name, filter.name
            )));
        }
        if filter.properties.is_empty() || filter.properties.iter().any(String::is_empty) {
            return Err(Error::Config(format!(
                "filter '{}' of breakdown '{}' needs non-empty properties",
                filter.name, breakdown.name
            )));
        }
    }
    Ok(())
}
