//! Query request types.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Error;

/// Comparison operator of a query filter.
///
/// Closed set: requests naming any other operator are rejected when parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// Property equals the value.
    #[serde(rename = "eq")]
    Eq,
    /// Property differs from the value.
    #[serde(rename = "ne", alias = "neq")]
    Ne,
}

impl Operator {
    /// Check a decoded property value against a filter value.
    ///
    /// A property that is absent from the decoded key never equals anything.
    pub fn matches(self, actual: Option<&str>, expected: &str) -> bool {
        match self {
            Operator::Eq => actual == Some(expected),
            Operator::Ne => actual != Some(expected),
        }
    }
}

/// One `{property_name, operator, property_value}` query filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    /// Event property the filter applies to.
    pub property_name: String,
    /// Comparison operator.
    pub operator: Operator,
    /// Value compared against.
    pub property_value: String,
}

impl QueryFilter {
    /// Create a new filter.
    pub fn new(
        property_name: impl Into<String>,
        operator: Operator,
        property_value: impl Into<String>,
    ) -> Self {
        Self {
            property_name: property_name.into(),
            operator,
            property_value: property_value.into(),
        }
    }

    /// Create an equality filter.
    pub fn eq(property_name: impl Into<String>, property_value: impl Into<String>) -> Self {
        Self::new(property_name, Operator::Eq, property_value)
    }

    /// Create an inequality filter.
    pub fn ne(property_name: impl Into<String>, property_value: impl Into<String>) -> Self {
        Self::new(property_name, Operator::Ne, property_value)
    }

    /// Check if this is an equality filter.
    pub fn is_eq(&self) -> bool {
        self.operator == Operator::Eq
    }
}

/// Requested time bucketing of the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    /// One bucket per hour.
    Hourly,
    /// One bucket per day.
    Daily,
    /// One bucket per week.
    Weekly,
}

impl Interval {
    /// Bucket width in milliseconds.
    pub fn size_ms(self) -> i64 {
        const HOUR_MS: i64 = 60 * 60 * 1000;
        match self {
            Interval::Hourly => HOUR_MS,
            Interval::Daily => 24 * HOUR_MS,
            Interval::Weekly => 7 * 24 * HOUR_MS,
        }
    }

    /// Start of the bucket containing `timestamp_ms`.
    pub fn bucket(self, timestamp_ms: i64) -> i64 {
        timestamp_ms - timestamp_ms.rem_euclid(self.size_ms())
    }
}

/// An analytics query over one event collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Property filters, all of which must hold.
    #[serde(default)]
    pub filters: Vec<QueryFilter>,

    /// Properties to group the result by. Accepts a single string.
    #[serde(default, deserialize_with = "deserialize_group_by")]
    pub group_by: Vec<String>,

    /// Relative timeframe such as `this_24_hours` or `prev_1_day`.
    pub timeframe: String,

    /// Bucketing interval. None yields a single value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<Interval>,

    /// IANA timezone for calendar flooring. None means UTC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    /// Event name the counters were recorded under.
    pub event_collection: String,

    /// Metric suffix to read. None means the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
}

impl QueryRequest {
    /// Create a request with no filters, grouping, or interval.
    pub fn new(event_collection: impl Into<String>, timeframe: impl Into<String>) -> Self {
        Self {
            filters: Vec::new(),
            group_by: Vec::new(),
            timeframe: timeframe.into(),
            interval: None,
            timezone: None,
            event_collection: event_collection.into(),
            metric: None,
        }
    }

    /// Parse and validate a JSON request.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let request: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidRequest(e.to_string()))?;
        request.validate()?;
        Ok(request)
    }

    /// Add a filter.
    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add a group-by property.
    pub fn with_group_by(mut self, property: impl Into<String>) -> Self {
        self.group_by.push(property.into());
        self
    }

    /// Set the interval.
    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Set the timezone.
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// Set the metric.
    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = Some(metric.into());
        self
    }

    /// Check the structural requirements serde cannot express.
    pub fn validate(&self) -> Result<(), Error> {
        if self.event_collection.is_empty() {
            return Err(Error::InvalidRequest("eventCollection must not be empty".into()));
        }
        if self.filters.iter().any(|f| f.property_name.is_empty()) {
            return Err(Error::InvalidRequest("filter property_name must not be empty".into()));
        }
        if self.group_by.iter().any(String::is_empty) {
            return Err(Error::InvalidRequest("groupBy entries must not be empty".into()));
        }

        let mut equals: HashMap<&str, &str> = HashMap::new();
        for filter in self.filters.iter().filter(|f| f.is_eq()) {
            let value = *equals
                .entry(filter.property_name.as_str())
                .or_insert(filter.property_value.as_str());
            if value != filter.property_value {
                return Err(Error::InvalidRequest(format!(
                    "contradictory equality filters on '{}'",
                    filter.property_name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn deserialize_group_by<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(property)) => vec![property],
        Some(OneOrMany::Many(properties)) => properties,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_request() {
        let request = QueryRequest::from_json(
            r#"{
                "filters": [
                    {"property_name": "unit_environment", "operator": "eq", "property_value": "PRODUCTION"},
                    {"property_name": "ip_geo_info.country", "operator": "ne", "property_value": "US"}
                ],
                "groupBy": "user_agent_device",
                "timeframe": "this_24_hours",
                "interval": "hourly",
                "timezone": "America/Los_Angeles",
                "eventCollection": "UnitFirstLoad"
            }"#,
        )
        .unwrap();

        assert_eq!(request.filters.len(), 2);
        assert_eq!(request.filters[1].operator, Operator::Ne);
        assert_eq!(request.group_by, vec!["user_agent_device"]);
        assert_eq!(request.interval, Some(Interval::Hourly));
        assert_eq!(request.timezone.as_deref(), Some("America/Los_Angeles"));
        assert!(request.metric.is_none());
    }

    #[test]
    fn test_group_by_forms() {
        let list = QueryRequest::from_json(
            r#"{"timeframe": "this_1_day", "eventCollection": "e", "groupBy": ["a", "b"]}"#,
        )
        .unwrap();
        assert_eq!(list.group_by, vec!["a", "b"]);

        let null = QueryRequest::from_json(
            r#"{"timeframe": "this_1_day", "eventCollection": "e", "groupBy": null}"#,
        )
        .unwrap();
        assert!(null.group_by.is_empty());

        let absent =
            QueryRequest::from_json(r#"{"timeframe": "this_1_day", "eventCollection": "e"}"#)
                .unwrap();
        assert!(absent.group_by.is_empty());
        assert!(absent.filters.is_empty());
    }

    #[test]
    fn test_operator_is_closed() {
        let neq = QueryRequest::from_json(
            r#"{"timeframe": "this_1_day", "eventCollection": "e",
                "filters": [{"property_name": "a", "operator": "neq", "property_value": "x"}]}"#,
        )
        .unwrap();
        assert_eq!(neq.filters[0].operator, Operator::Ne);

        let err = QueryRequest::from_json(
            r#"{"timeframe": "this_1_day", "eventCollection": "e",
                "filters": [{"property_name": "a", "operator": "gt", "property_value": "x"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn test_validate_rejects_empty_collection() {
        let request = QueryRequest::new("", "this_1_day");
        assert!(matches!(request.validate(), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_validate_rejects_contradictory_equality() {
        let request = QueryRequest::new("UnitFirstLoad", "this_1_day")
            .with_filter(QueryFilter::eq("unit_domain", "foo.com"))
            .with_filter(QueryFilter::eq("unit_domain", "bar.com"));
        match request.validate() {
            Err(Error::InvalidRequest(msg)) => assert!(msg.contains("unit_domain"), "{msg}"),
            other => panic!("expected InvalidRequest, got {other:?}"),
        }

        let repeated = QueryRequest::new("UnitFirstLoad", "this_1_day")
            .with_filter(QueryFilter::eq("unit_domain", "foo.com"))
            .with_filter(QueryFilter::eq("unit_domain", "foo.com"))
            .with_filter(QueryFilter::ne("unit_domain", "bar.com"));
        assert!(repeated.validate().is_ok());
    }

    #[test]
    fn test_operator_matches() {
        assert!(Operator::Eq.matches(Some("US"), "US"));
        assert!(!Operator::Eq.matches(Some("DE"), "US"));
        assert!(!Operator::Eq.matches(None, "US"));
        assert!(Operator::Ne.matches(Some("DE"), "US"));
        assert!(!Operator::Ne.matches(Some("US"), "US"));
        assert!(Operator::Ne.matches(None, "US"));
    }

    #[test]
    fn test_interval_buckets() {
        let ts = 1447675200000; // 2015-11-16T12:00:00Z
        assert_eq!(Interval::Hourly.bucket(ts + 1), ts);
        assert_eq!(Interval::Daily.bucket(ts), 1447632000000);
        assert_eq!(Interval::Weekly.size_ms(), 604_800_000);
    }
}
