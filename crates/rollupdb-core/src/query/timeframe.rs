//! Relative timeframe parsing.
//!
//! Expressions have the form `(this|prev)_[N_]unit`. `this_N_unit` covers the
//! current unit and the N-1 before it and is open-ended. `prev_N_unit` covers
//! the N complete units before the current one. Unit boundaries are computed
//! in the requested timezone; weeks start on Sunday.

use std::fmt;
use std::str::FromStr;

use chrono::{
    DateTime, Datelike, Days, Months, NaiveDate, NaiveDateTime, SecondsFormat, TimeDelta, TimeZone,
    Timelike, Utc,
};
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::Error;

/// Calendar unit of a timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl FromStr for TimeUnit {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_suffix('s').unwrap_or(s) {
            "minute" => Ok(TimeUnit::Minute),
            "hour" => Ok(TimeUnit::Hour),
            "day" => Ok(TimeUnit::Day),
            "week" => Ok(TimeUnit::Week),
            "month" => Ok(TimeUnit::Month),
            "year" => Ok(TimeUnit::Year),
            _ => Err(()),
        }
    }
}

/// Whether the range includes the current unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Anchor {
    This,
    Prev,
}

/// A parsed timeframe expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeframe {
    pub anchor: Anchor,
    pub count: u32,
    pub unit: TimeUnit,
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let anchor = match self.anchor {
            Anchor::This => "this",
            Anchor::Prev => "prev",
        };
        let unit = match self.unit {
            TimeUnit::Minute => "minutes",
            TimeUnit::Hour => "hours",
            TimeUnit::Day => "days",
            TimeUnit::Week => "weeks",
            TimeUnit::Month => "months",
            TimeUnit::Year => "years",
        };
        write!(f, "{anchor}_{}_{unit}", self.count)
    }
}

/// Resolved epoch-millisecond bounds. `end` is None for open-ended ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub start: i64,
    pub end: Option<i64>,
}

/// ISO-8601 rendering of a [`TimeRange`] as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeframeOutput {
    pub start: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

impl From<TimeRange> for TimeframeOutput {
    fn from(range: TimeRange) -> Self {
        Self {
            start: format_timestamp(range.start),
            end: range.end.map(format_timestamp),
        }
    }
}

impl Timeframe {
    /// Parse a timeframe expression.
    pub fn parse(expr: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidTimeframe(expr.to_string());

        let parts: Vec<&str> = expr.split('_').collect();
        let (anchor, count, unit) = match parts.as_slice() {
            [anchor, unit] => (*anchor, 1, *unit),
            [anchor, count, unit] => {
                let count: u32 = count.parse().map_err(|_| invalid())?;
                (*anchor, count, *unit)
            }
            _ => return Err(invalid()),
        };

        let anchor = match anchor {
            "this" => Anchor::This,
            "prev" => Anchor::Prev,
            _ => return Err(invalid()),
        };
        if count == 0 {
            return Err(invalid());
        }
        let unit = unit.parse().map_err(|_| invalid())?;

        Ok(Self { anchor, count, unit })
    }

    /// Resolve against `now` in `tz`.
    ///
    /// Fails with the canonical expression when a bound falls outside the
    /// representable calendar.
    pub fn resolve(&self, now: DateTime<Utc>, tz: Tz) -> Result<TimeRange, Error> {
        let out_of_range = || Error::InvalidTimeframe(self.to_string());

        let floor = floor_to_unit(now, tz, self.unit).ok_or_else(out_of_range)?;
        match self.anchor {
            Anchor::This => {
                let start =
                    subtract_units(floor, tz, self.unit, self.count - 1).ok_or_else(out_of_range)?;
                Ok(TimeRange {
                    start: start.timestamp_millis(),
                    end: None,
                })
            }
            Anchor::Prev => {
                let start =
                    subtract_units(floor, tz, self.unit, self.count).ok_or_else(out_of_range)?;
                Ok(TimeRange {
                    start: start.timestamp_millis(),
                    end: Some(floor.timestamp_millis()),
                })
            }
        }
    }
}

/// Parse `expr` and resolve it against `now` in the named timezone.
///
/// Timeframe errors always carry `expr` as the caller wrote it.
pub fn parse_timeframe(
    now: DateTime<Utc>,
    expr: &str,
    timezone: Option<&str>,
) -> Result<TimeRange, Error> {
    let tz = parse_timezone(timezone)?;
    Timeframe::parse(expr)?
        .resolve(now, tz)
        .map_err(|_| Error::InvalidTimeframe(expr.to_string()))
}

/// Look up an IANA timezone. None means UTC.
pub fn parse_timezone(name: Option<&str>) -> Result<Tz, Error> {
    match name {
        None => Ok(Tz::UTC),
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| Error::InvalidTimezone(name.to_string())),
    }
}

/// Render epoch milliseconds as an ISO-8601 UTC timestamp.
pub fn format_timestamp(timestamp_ms: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(timestamp_ms) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => timestamp_ms.to_string(),
    }
}

fn floor_to_unit(now: DateTime<Utc>, tz: Tz, unit: TimeUnit) -> Option<DateTime<Tz>> {
    let local = now.with_timezone(&tz).naive_local();
    let date = local.date();
    let floored = match unit {
        TimeUnit::Minute => date.and_hms_opt(local.hour(), local.minute(), 0)?,
        TimeUnit::Hour => date.and_hms_opt(local.hour(), 0, 0)?,
        TimeUnit::Day => date.and_hms_opt(0, 0, 0)?,
        TimeUnit::Week => {
            let back = u64::from(date.weekday().num_days_from_sunday());
            date.checked_sub_days(Days::new(back))?.and_hms_opt(0, 0, 0)?
        }
        TimeUnit::Month => {
            NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?.and_hms_opt(0, 0, 0)?
        }
        TimeUnit::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1)?.and_hms_opt(0, 0, 0)?,
    };
    localize(tz, floored)
}

fn subtract_units(from: DateTime<Tz>, tz: Tz, unit: TimeUnit, count: u32) -> Option<DateTime<Tz>> {
    if count == 0 {
        return Some(from);
    }
    let n = i64::from(count);
    let local = from.naive_local();
    match unit {
        // Sub-day units are absolute durations.
        TimeUnit::Minute => from.checked_sub_signed(TimeDelta::try_minutes(n)?),
        TimeUnit::Hour => from.checked_sub_signed(TimeDelta::try_hours(n)?),
        TimeUnit::Day => localize(tz, local.checked_sub_days(Days::new(u64::from(count)))?),
        TimeUnit::Week => localize(tz, local.checked_sub_days(Days::new(7 * u64::from(count)))?),
        TimeUnit::Month => localize(tz, local.checked_sub_months(Months::new(count))?),
        TimeUnit::Year => {
            localize(tz, local.checked_sub_months(Months::new(count.checked_mul(12)?))?)
        }
    }
}

/// Map a local wall-clock time to an instant, taking the earlier of an
/// ambiguous pair. A time inside a DST gap moves forward one hour.
fn localize(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + TimeDelta::hours(1))).earliest())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn ms(s: &str) -> i64 {
        at(s).timestamp_millis()
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            Timeframe::parse("this_24_hours").unwrap(),
            Timeframe {
                anchor: Anchor::This,
                count: 24,
                unit: TimeUnit::Hour,
            }
        );
        assert_eq!(
            Timeframe::parse("prev_day").unwrap(),
            Timeframe {
                anchor: Anchor::Prev,
                count: 1,
                unit: TimeUnit::Day,
            }
        );
        assert_eq!(Timeframe::parse("this_2_weeks").unwrap().unit, TimeUnit::Week);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for expr in [
            "",
            "last_1_day",
            "this_0_days",
            "this_-1_days",
            "this_x_days",
            "this_1_fortnight",
            "this_1_2_days",
        ] {
            match Timeframe::parse(expr) {
                Err(Error::InvalidTimeframe(input)) => assert_eq!(input, expr),
                other => panic!("{expr}: expected InvalidTimeframe, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_this_is_open_ended() {
        let now = at("2015-11-16T13:25:00Z");
        let range = parse_timeframe(now, "this_1_day", None).unwrap();
        assert_eq!(range.start, ms("2015-11-16T00:00:00Z"));
        assert_eq!(range.end, None);

        let range = parse_timeframe(now, "this_24_hours", None).unwrap();
        assert_eq!(range.start, ms("2015-11-15T14:00:00Z"));
    }

    #[test]
    fn test_prev_ends_at_current_unit() {
        let now = at("2015-11-16T13:25:00Z");
        let range = parse_timeframe(now, "prev_1_day", None).unwrap();
        assert_eq!(range.start, ms("2015-11-15T00:00:00Z"));
        assert_eq!(range.end, Some(ms("2015-11-16T00:00:00Z")));

        let range = parse_timeframe(now, "prev_3_minutes", None).unwrap();
        assert_eq!(range.start, ms("2015-11-16T13:22:00Z"));
        assert_eq!(range.end, Some(ms("2015-11-16T13:25:00Z")));
    }

    #[test]
    fn test_weeks_start_on_sunday() {
        // 2015-11-16 is a Monday.
        let range = parse_timeframe(at("2015-11-16T13:25:00Z"), "this_1_week", None).unwrap();
        assert_eq!(range.start, ms("2015-11-15T00:00:00Z"));

        let range = parse_timeframe(at("2015-11-15T00:00:00Z"), "prev_week", None).unwrap();
        assert_eq!(range.start, ms("2015-11-08T00:00:00Z"));
        assert_eq!(range.end, Some(ms("2015-11-15T00:00:00Z")));
    }

    #[test]
    fn test_months_and_years() {
        let now = at("2015-03-31T10:00:00Z");
        let range = parse_timeframe(now, "prev_1_month", None).unwrap();
        assert_eq!(range.start, ms("2015-02-01T00:00:00Z"));
        assert_eq!(range.end, Some(ms("2015-03-01T00:00:00Z")));

        let range = parse_timeframe(now, "this_2_years", None).unwrap();
        assert_eq!(range.start, ms("2014-01-01T00:00:00Z"));
    }

    #[test]
    fn test_timezone_floor() {
        // 2015-11-12 18:25 PST.
        let range = parse_timeframe(
            at("2015-11-13T02:25:38.660Z"),
            "this_1_day",
            Some("America/Los_Angeles"),
        )
        .unwrap();
        assert_eq!(range.start, 1447315200000);
        assert_eq!(format_timestamp(range.start), "2015-11-12T08:00:00.000Z");
    }

    #[test]
    fn test_day_across_dst_change() {
        // DST ended 2015-11-01 in Los Angeles, so that day lasted 25 hours.
        let range = parse_timeframe(
            at("2015-11-02T12:00:00Z"),
            "prev_1_day",
            Some("America/Los_Angeles"),
        )
        .unwrap();
        assert_eq!(range.start, ms("2015-11-01T07:00:00Z"));
        assert_eq!(range.end, Some(ms("2015-11-02T08:00:00Z")));
    }

    #[test]
    fn test_invalid_timezone() {
        let err = parse_timeframe(Utc::now(), "this_1_day", Some("Mars/Olympus")).unwrap_err();
        assert!(matches!(err, Error::InvalidTimezone(name) if name == "Mars/Olympus"));
    }

    #[test]
    fn test_output_formatting() {
        let output = TimeframeOutput::from(TimeRange {
            start: 1447671600000,
            end: None,
        });
        assert_eq!(output.start, "2015-11-16T11:00:00.000Z");
        assert_eq!(
            serde_json::to_value(&output).unwrap(),
            serde_json::json!({"start": "2015-11-16T11:00:00.000Z"})
        );
    }

    #[test]
    fn test_out_of_range_reports_expression() {
        let err = parse_timeframe(DateTime::<Utc>::MIN_UTC, "prev_1_year", None).unwrap_err();
        assert!(matches!(err, Error::InvalidTimeframe(ref expr) if expr == "prev_1_year"));

        let parsed = Timeframe::parse("prev_year").unwrap();
        assert_eq!(parsed.to_string(), "prev_1_years");
        match parsed.resolve(DateTime::<Utc>::MIN_UTC, Tz::UTC) {
            Err(Error::InvalidTimeframe(expr)) => assert_eq!(expr, "prev_1_years"),
            other => panic!("expected InvalidTimeframe, got {other:?}"),
        }
    }
}
