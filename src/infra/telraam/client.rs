use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::fetch::auth::ApiKey;
use crate::fetch::{
    BasicClient, FetchError, HttpClient, endpoint, get_request, post_json_request, send_json,
};
use crate::parser::ReportBatch;
use crate::services::counting_api::{CountingApi, SegmentInfo, format_api_time};

pub const DEFAULT_BASE_URL: &str = "https://telraam-api.net";

/// Properties that may carry a segment id, in order of preference.
const SEGMENT_ID_KEYS: &[&str] = &["segment_id", "oidn", "id"];

#[derive(Serialize)]
struct TrafficRequest<'a> {
    level: &'static str,
    format: &'static str,
    id: &'a str,
    time_start: String,
    time_end: String,
}

#[derive(Serialize)]
struct SnapshotRequest<'a> {
    time: &'a str,
    contents: &'static str,
    area: &'a str,
}

pub struct TelraamClient<C> {
    http: C,
    base_url: String,
}

impl TelraamClient<ApiKey<BasicClient>> {
    /// Builds a client that authenticates with `X-Api-Key`.
    pub fn new(api_key: &str, base_url: &str) -> Result<Self, FetchError> {
        let http = ApiKey::telraam(BasicClient::new()?, api_key)?;
        Ok(Self::with_http(http, base_url))
    }
}

impl<C: HttpClient> TelraamClient<C> {
    pub fn with_http(http: C, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.to_string(),
        }
    }
}

#[async_trait]
impl<C: HttpClient> CountingApi for TelraamClient<C> {
    async fn list_segments(&self) -> Result<Vec<SegmentInfo>, FetchError> {
        let url = endpoint(&self.base_url, "/v1/segments/all")?;
        let json = send_json(&self.http, get_request(url)).await?;
        let segments = parse_segment_catalog(&json);
        debug!(count = segments.len(), "Segment catalog parsed");
        Ok(segments)
    }

    async fn segment_reports(
        &self,
        segment_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ReportBatch, FetchError> {
        let url = endpoint(&self.base_url, "/v1/reports/traffic")?;
        let body = TrafficRequest {
            level: "segments",
            format: "per-hour",
            id: segment_id,
            time_start: format_api_time(start),
            time_end: format_api_time(end),
        };
        let json = send_json(&self.http, post_json_request(url, &body)?).await?;
        Ok(serde_json::from_value(json)?)
    }

    async fn traffic_snapshot(&self, area: &str, time: &str) -> Result<Value, FetchError> {
        let url = endpoint(&self.base_url, "/v1/reports/traffic_snapshot")?;
        let body = SnapshotRequest {
            time,
            contents: "minimal",
            area,
        };
        send_json(&self.http, post_json_request(url, &body)?).await
    }
}

/// Extracts segment ids and reference coordinates from the catalog
/// feature collection. Features without an id or coordinate are skipped.
pub fn parse_segment_catalog(json: &Value) -> Vec<SegmentInfo> {
    let Some(features) = json["features"].as_array() else {
        return Vec::new();
    };

    features
        .iter()
        .filter_map(|feature| {
            let props = &feature["properties"];
            let id = SEGMENT_ID_KEYS
                .iter()
                .find_map(|key| id_string(&props[*key]))?;
            let coordinates = first_vertex(&feature["geometry"]["coordinates"])?;
            Some(SegmentInfo { id, coordinates })
        })
        .collect()
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Descends nested coordinate arrays (Point, LineString, MultiLineString,
/// ...) to the first `[x, y]` position.
fn first_vertex(coords: &Value) -> Option<[f64; 2]> {
    let items = coords.as_array()?;
    match (items.first()?.as_f64(), items.get(1).and_then(Value::as_f64)) {
        (Some(x), Some(y)) => Some([x, y]),
        _ => first_vertex(items.first()?),
    }
}
