//! Engine configuration.
//!
//! The configuration is loaded once, validated, and shared read-only between
//! the query engine and the ingestor.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::error::Error;

/// Default storage period name.
pub const DEFAULT_PERIOD_NAME: &str = "hourly";

/// Default storage period width (1 hour).
pub const DEFAULT_PERIOD_MODULUS_MS: i64 = 60 * 60 * 1000;

/// Default metric suffix: the event count.
pub const DEFAULT_METRIC_NAME: &str = "count";

/// How column keys treat a missing property value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEncoding {
    /// Missing values serialize as an empty key segment.
    #[default]
    Lenient,
    /// Missing values fail encoding, like row keys do.
    Strict,
}

/// The base aggregation period rows are bucketed by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodConfig {
    /// Period name, used as the table-name suffix.
    pub name: String,
    /// Bucket width in milliseconds.
    pub modulus_ms: i64,
}

impl Default for PeriodConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_PERIOD_NAME.to_string(),
            modulus_ms: DEFAULT_PERIOD_MODULUS_MS,
        }
    }
}

impl PeriodConfig {
    /// Floor a timestamp to the start of its storage bucket.
    pub fn bucket(&self, timestamp_ms: i64) -> i64 {
        timestamp_ms - timestamp_ms.rem_euclid(self.modulus_ms)
    }
}

/// An additional summed metric written alongside the event count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraAggregation {
    /// Event property (dotted path) holding the numeric value to sum.
    pub property: String,
    /// Metric suffix the sum is stored under.
    pub name: String,
}

impl ExtraAggregation {
    /// Create a new extra aggregation.
    pub fn new(property: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            name: name.into(),
        }
    }
}

/// rollupdb engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Precomputed breakdowns, in resolution order.
    #[serde(rename = "breakdowns")]
    pub catalog: Catalog,

    /// Extra summed metrics.
    #[serde(default)]
    pub extra_aggregations: Vec<ExtraAggregation>,

    /// Storage bucket period.
    #[serde(default)]
    pub period: PeriodConfig,

    /// Metric queried when a request names none.
    #[serde(default = "default_metric")]
    pub default_metric: String,

    /// Column-key strictness.
    #[serde(default)]
    pub key_encoding: KeyEncoding,

    /// Per-query deadline in milliseconds. None means no deadline.
    #[serde(default)]
    pub query_timeout_ms: Option<u64>,
}

fn default_metric() -> String {
    DEFAULT_METRIC_NAME.to_string()
}

impl EngineConfig {
    /// Create a configuration with defaults for everything but the catalog.
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            extra_aggregations: Vec::new(),
            period: PeriodConfig::default(),
            default_metric: default_metric(),
            key_encoding: KeyEncoding::default(),
            query_timeout_ms: None,
        }
    }

    /// Add an extra aggregation.
    pub fn with_extra_aggregation(mut self, aggregation: ExtraAggregation) -> Self {
        self.extra_aggregations.push(aggregation);
        self
    }

    /// Set the storage period.
    pub fn with_period(mut self, name: impl Into<String>, modulus_ms: i64) -> Self {
        self.period = PeriodConfig {
            name: name.into(),
            modulus_ms,
        };
        self
    }

    /// Set the column-key strictness.
    pub fn with_key_encoding(mut self, encoding: KeyEncoding) -> Self {
        self.key_encoding = encoding;
        self
    }

    /// Set the per-query deadline.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        tracing::debug!(
            path = %path.display(),
            breakdowns = config.catalog.len(),
            extra_aggregations = config.extra_aggregations.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Check the parts of the configuration the catalog does not cover.
    pub fn validate(&self) -> Result<(), Error> {
        if self.period.name.is_empty() {
            return Err(Error::Config("period name must not be empty".into()));
        }
        if self.period.modulus_ms <= 0 {
            return Err(Error::Config(format!(
                "period modulus must be positive, got {}",
                self.period.modulus_ms
            )));
        }
        if self.default_metric.is_empty() {
            return Err(Error::Config("default metric must not be empty".into()));
        }

        let mut metrics = HashSet::new();
        metrics.insert(self.default_metric.as_str());
        for aggregation in &self.extra_aggregations {
            if aggregation.name.is_empty() || aggregation.property.is_empty() {
                return Err(Error::Config(
                    "extra aggregation needs a name and a property".into(),
                ));
            }
            if !metrics.insert(aggregation.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate metric '{}'",
                    aggregation.name
                )));
            }
        }
        Ok(())
    }

    /// Every metric suffix written per event: the default metric first.
    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.default_metric.as_str())
            .chain(self.extra_aggregations.iter().map(|a| a.name.as_str()))
    }

    /// Check if a metric suffix is known.
    pub fn has_metric(&self, metric: &str) -> bool {
        self.metric_names().any(|m| m == metric)
    }

    /// The per-query deadline, if any.
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "breakdowns": [
            {"name": "video_performance", "dimensions": ["video_id", "unit_domain"]},
            {
                "name": "publisher_metrics",
                "dimensions": ["unit_environment", "unit_pbid", "unit_domain"],
                "filters": [
                    {"name": "geo", "properties": ["ip_geo_info.country"]},
                    {"name": "device_layout", "properties": ["user_agent_device", "unit_layout"]}
                ]
            }
        ],
        "extra_aggregations": [
            {"property": "unit_video_list.length", "name": "total_impressions"}
        ]
    }"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = EngineConfig::from_json(CONFIG).unwrap();
        assert_eq!(config.catalog.len(), 2);
        assert_eq!(config.period, PeriodConfig::default());
        assert_eq!(config.default_metric, "count");
        assert_eq!(config.key_encoding, KeyEncoding::Lenient);
        assert!(config.query_timeout().is_none());

        let metrics: Vec<&str> = config.metric_names().collect();
        assert_eq!(metrics, vec!["count", "total_impressions"]);
        assert!(config.has_metric("total_impressions"));
        assert!(!config.has_metric("revenue"));
    }

    #[test]
    fn test_period_bucket() {
        let period = PeriodConfig::default();
        assert_eq!(period.bucket(1447671600000), 1447671600000);
        assert_eq!(period.bucket(1447671600000 + 59 * 60 * 1000), 1447671600000);
        assert_eq!(period.bucket(-1), -DEFAULT_PERIOD_MODULUS_MS);
    }

    #[test]
    fn test_invalid_period_rejected() {
        let config = EngineConfig::new(Catalog::default()).with_period("hourly", 0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_metric_collision_rejected() {
        let config = EngineConfig::new(Catalog::default())
            .with_extra_aggregation(ExtraAggregation::new("impressions", "count"));
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, CONFIG).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert!(config.catalog.get_breakdown("publisher_metrics").is_some());

        assert!(matches!(
            EngineConfig::load(dir.path().join("missing.json")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_strict_encoding_parses() {
        let json = r#"{"breakdowns": [], "key_encoding": "strict", "query_timeout_ms": 250}"#;
        let config = EngineConfig::from_json(json).unwrap();
        assert_eq!(config.key_encoding, KeyEncoding::Strict);
        assert_eq!(config.query_timeout(), Some(Duration::from_millis(250)));
    }
}
