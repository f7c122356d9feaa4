//! Trait and types for talking to a traffic counting service.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::fetch::FetchError;
use crate::parser::ReportBatch;

/// A counting segment from the catalog with its reference coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentInfo {
    pub id: String,
    /// `[x, y]`, i.e. `[lon, lat]` for geographic catalogs.
    pub coordinates: [f64; 2],
}

/// Abstraction over a counting provider (e.g., Telraam).
#[async_trait::async_trait]
pub trait CountingApi: Send + Sync {
    /// Returns every known segment in one call.
    async fn list_segments(&self) -> Result<Vec<SegmentInfo>, FetchError>;

    /// Returns the hourly reports of `segment_id` within `[start, end]`.
    async fn segment_reports(
        &self,
        segment_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ReportBatch, FetchError>;

    /// Returns a point-in-time feature collection for a bounding box.
    async fn traffic_snapshot(&self, area: &str, time: &str) -> Result<Value, FetchError>;
}

/// Formats an instant the way the API expects (`2021-06-01T08:00:00Z`).
pub fn format_api_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
