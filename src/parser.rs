//! Parsing of raw Telraam report payloads into [`Report`] values.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// One hourly observation for a segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub date: DateTime<Utc>,
    pub car: f64,
    pub bike: f64,
    pub pedestrian: f64,
}

/// The wire shape of a single entry in a `report` array.
///
/// Telraam sends counts as floats (`12.0`) even though they are whole
/// numbers, so they are read as `f64` and validated afterwards.
#[derive(Debug, Deserialize)]
struct RawReport {
    date: String,
    car: f64,
    bike: f64,
    pedestrian: f64,
}

/// Top-level body of the per-segment time series endpoint and of the
/// per-segment files read by the `aggregate` command.
#[derive(Debug, Default, Deserialize)]
pub struct ReportBatch {
    #[serde(default)]
    pub report: Vec<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("invalid report timestamp '{value}': {source}")]
    Timestamp {
        value: String,
        source: chrono::ParseError,
    },
    #[error("malformed report: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("negative or non-finite {field} count: {value}")]
    InvalidCount { field: &'static str, value: f64 },
}

/// What to do with a report that fails to parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportPolicy {
    /// Drop the bad record and keep the rest of the segment.
    #[default]
    Skip,
    /// Fail the whole segment on the first bad record.
    Abort,
}

const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Parses an ISO 8601 timestamp and normalizes it to UTC.
///
/// `Z` denotes UTC; numeric offsets are converted so the hour-of-day
/// always refers to the UTC instant. A timestamp without any offset is
/// taken to be UTC already.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ReportError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(value, NAIVE_FORMAT).map(|dt| dt.and_utc()))
        .map_err(|source| ReportError::Timestamp {
            value: value.to_string(),
            source,
        })
}

fn check_count(field: &'static str, value: f64) -> Result<f64, ReportError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ReportError::InvalidCount { field, value })
    }
}

impl Report {
    /// Parses a single report object.
    pub fn from_value(value: Value) -> Result<Self, ReportError> {
        let raw: RawReport = serde_json::from_value(value)?;
        Ok(Report {
            date: parse_timestamp(&raw.date)?,
            car: check_count("car", raw.car)?,
            bike: check_count("bike", raw.bike)?,
            pedestrian: check_count("pedestrian", raw.pedestrian)?,
        })
    }
}

/// Parses every entry of a batch according to `policy`.
///
/// With [`ReportPolicy::Skip`] bad entries are logged and dropped; with
/// [`ReportPolicy::Abort`] the first bad entry is returned as the error.
pub fn parse_reports(batch: ReportBatch, policy: ReportPolicy) -> Result<Vec<Report>, ReportError> {
    let mut reports = Vec::with_capacity(batch.report.len());

    for (index, value) in batch.report.into_iter().enumerate() {
        match Report::from_value(value) {
            Ok(report) => reports.push(report),
            Err(e) if policy == ReportPolicy::Skip => {
                warn!(index, error = %e, "Skipping malformed report");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use serde_json::json;

    #[test]
    fn test_parse_z_suffix_is_utc() {
        let dt = parse_timestamp("2021-06-01T08:15:00Z").unwrap();
        assert_eq!(dt.hour(), 8);
    }

    #[test]
    fn test_parse_fractional_seconds() {
        let dt = parse_timestamp("2021-06-01T23:00:00.000Z").unwrap();
        assert_eq!(dt.hour(), 23);
    }

    #[test]
    fn test_offset_is_normalized_to_utc() {
        let dt = parse_timestamp("2021-06-01T10:30:00+02:00").unwrap();
        assert_eq!(dt.hour(), 8);
    }

    #[test]
    fn test_timestamp_without_offset_is_utc() {
        let dt = parse_timestamp("2021-06-01T08:15:00").unwrap();
        assert_eq!(dt.hour(), 8);
        assert_eq!(dt, parse_timestamp("2021-06-01T08:15:00Z").unwrap());

        let fractional = parse_timestamp("2021-06-01T23:00:00.500").unwrap();
        assert_eq!(fractional.hour(), 23);
    }

    #[test]
    fn test_parse_invalid_timestamp() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(ReportError::Timestamp { .. })
        ));
    }

    #[test]
    fn test_report_accepts_integer_and_float_counts() {
        let report = Report::from_value(json!({
            "date": "2021-06-01T08:00:00Z",
            "car": 3,
            "bike": 1.0,
            "pedestrian": 0,
            "heavy": 2.0
        }))
        .unwrap();

        assert_eq!(report.car, 3.0);
        assert_eq!(report.bike, 1.0);
        assert_eq!(report.pedestrian, 0.0);
    }

    #[test]
    fn test_report_rejects_negative_count() {
        let result = Report::from_value(json!({
            "date": "2021-06-01T08:00:00Z",
            "car": -1,
            "bike": 0,
            "pedestrian": 0
        }));
        assert!(matches!(
            result,
            Err(ReportError::InvalidCount { field: "car", .. })
        ));
    }

    #[test]
    fn test_report_missing_field() {
        let result = Report::from_value(json!({"date": "2021-06-01T08:00:00Z", "car": 1}));
        assert!(matches!(result, Err(ReportError::Malformed(_))));
    }

    fn mixed_batch() -> ReportBatch {
        ReportBatch {
            report: vec![
                json!({"date": "2021-06-01T08:00:00Z", "car": 1, "bike": 0, "pedestrian": 0}),
                json!({"date": "not a date", "car": 1, "bike": 0, "pedestrian": 0}),
                json!({"date": "2021-06-01T09:00:00Z", "car": 2, "bike": 0, "pedestrian": 0}),
            ],
        }
    }

    #[test]
    fn test_skip_policy_drops_only_bad_record() {
        let reports = parse_reports(mixed_batch(), ReportPolicy::Skip).unwrap();
        assert_eq!(reports.len(), 2);
    }

    #[test]
    fn test_abort_policy_fails_batch() {
        let result = parse_reports(mixed_batch(), ReportPolicy::Abort);
        assert!(result.is_err());
    }

    #[test]
    fn test_skip_policy_keeps_offset_less_report() {
        let batch = ReportBatch {
            report: vec![json!({"date": "2021-06-01T08:15:00", "car": 4, "bike": 0, "pedestrian": 1})],
        };
        let reports = parse_reports(batch, ReportPolicy::Skip).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].car, 4.0);
    }

    #[test]
    fn test_missing_report_key_is_empty() {
        let batch: ReportBatch = serde_json::from_str("{}").unwrap();
        assert!(parse_reports(batch, ReportPolicy::Abort).unwrap().is_empty());
    }
}
