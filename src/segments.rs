//! Per-segment report fetching and the catalog-wide fan-out.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, error, info, warn};

use crate::analyzers::hourly::hourly_averages;
use crate::analyzers::types::{SegmentSummary, SegmentsDocument};
use crate::fetch::{RetryPolicy, with_retry};
use crate::parser::{ReportBatch, ReportPolicy, parse_reports};
use crate::services::counting_api::{CountingApi, SegmentInfo};

pub const DEFAULT_WINDOW_DAYS: i64 = 90;
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Closed time interval `[start, end]` requested for every segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        anyhow::ensure!(start <= end, "window start {start} is after end {end}");
        Ok(Self { start, end })
    }

    /// The `days` days leading up to `end`.
    pub fn trailing(days: i64, end: DateTime<Utc>) -> Result<Self> {
        anyhow::ensure!(days >= 0, "window length must not be negative, got {days}");
        let start = TimeDelta::try_days(days)
            .and_then(|length| end.checked_sub_signed(length))
            .with_context(|| format!("window of {days} days before {end} is out of range"))?;
        Self::new(start, end)
    }
}

/// Settings for a catalog-wide run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub window: FetchWindow,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub report_policy: ReportPolicy,
}

/// Result of a fan-out: the aggregated segments plus the ids left out.
#[derive(Debug, Default)]
pub struct SegmentBatch {
    pub document: SegmentsDocument,
    pub failed: Vec<String>,
}

/// Fetches one segment's reports, retrying per `retry`.
///
/// A segment whose calls all fail yields `None`; the error is logged and
/// never propagated.
pub async fn fetch_segment_reports<A: CountingApi + ?Sized>(
    api: &A,
    segment_id: &str,
    window: FetchWindow,
    retry: &RetryPolicy,
) -> Option<ReportBatch> {
    let result = with_retry(retry, |_| api.segment_reports(segment_id, window.start, window.end)).await;

    match result {
        Ok(batch) => Some(batch),
        Err(e) => {
            warn!(segment_id, error = %e, "No data for segment");
            None
        }
    }
}

/// Fetches and aggregates one segment. `None` means the segment is left
/// out of the document.
async fn summarize_segment<A: CountingApi + ?Sized>(
    api: &A,
    segment: &SegmentInfo,
    options: &BatchOptions,
) -> Option<SegmentSummary> {
    let fetch_start = Instant::now();
    let batch = fetch_segment_reports(api, &segment.id, options.window, &options.retry).await?;

    let reports = match parse_reports(batch, options.report_policy) {
        Ok(reports) => reports,
        Err(e) => {
            error!(error = %e, "Segment reports rejected");
            return None;
        }
    };

    debug!(
        reports = reports.len(),
        elapsed_ms = fetch_start.elapsed().as_millis() as u64,
        "Segment fetched"
    );

    Some(SegmentSummary {
        averages: hourly_averages(&reports),
        coordinates: Some(segment.coordinates),
    })
}

/// Fetches and aggregates every segment on a bounded pool of tasks.
///
/// At most `options.concurrency` requests are in flight. A segment that
/// fails (error or panic) is only recorded in [`SegmentBatch::failed`];
/// the remaining segments are unaffected.
#[tracing::instrument(skip_all, fields(segment_count = segments.len(), concurrency = options.concurrency))]
pub async fn collect_segments<A>(
    api: Arc<A>,
    segments: Vec<SegmentInfo>,
    options: &BatchOptions,
) -> SegmentBatch
where
    A: CountingApi + ?Sized + 'static,
{
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut tasks = Vec::with_capacity(segments.len());

    for segment in segments {
        let sem = semaphore.clone();
        let api = api.clone();
        let options = options.clone();
        let segment_id = segment.id.clone();

        let span = tracing::info_span!("process_segment", segment_id = %segment.id);
        let task = tokio::spawn(
            async move {
                let Ok(_permit) = sem.acquire().await else {
                    return None;
                };
                summarize_segment(api.as_ref(), &segment, &options).await
            }
            .instrument(span),
        );

        tasks.push((segment_id, task));
    }

    let mut batch = SegmentBatch::default();

    for (segment_id, task) in tasks {
        match task.await {
            Ok(Some(summary)) => {
                batch.document.insert(segment_id, summary);
            }
            Ok(None) => batch.failed.push(segment_id),
            Err(e) => {
                error!(segment_id, error = %e, "Segment task panicked");
                batch.failed.push(segment_id);
            }
        }
    }

    info!(
        succeeded = batch.document.len(),
        failed = batch.failed.len(),
        "Segment batch complete"
    );
    batch
}

/// Lists the catalog and runs [`collect_segments`] over it.
///
/// The catalog call itself is retried; if it still fails the run fails,
/// since there is nothing to fan out over.
pub async fn fetch_all_segments<A>(api: Arc<A>, options: &BatchOptions) -> Result<SegmentBatch>
where
    A: CountingApi + ?Sized + 'static,
{
    let started = Instant::now();
    let segments = with_retry(&options.retry, |_| api.list_segments())
        .await
        .context("Failed to list segments")?;
    info!(
        count = segments.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Segment catalog fetched"
    );

    Ok(collect_segments(api, segments, options).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchError;
    use chrono::TimeZone;
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves canned reports; ids listed in `failing` always error.
    #[derive(Default)]
    struct FakeApi {
        reports: HashMap<String, Vec<Value>>,
        failing: Vec<String>,
        calls: Mutex<HashMap<String, u32>>,
    }

    impl FakeApi {
        fn calls_for(&self, id: &str) -> u32 {
            self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
        }
    }

    #[async_trait::async_trait]
    impl CountingApi for FakeApi {
        async fn list_segments(&self) -> Result<Vec<SegmentInfo>, FetchError> {
            let mut ids: Vec<_> = self.reports.keys().chain(self.failing.iter()).cloned().collect();
            ids.sort();
            Ok(ids
                .into_iter()
                .map(|id| SegmentInfo {
                    id,
                    coordinates: [13.4, 52.5],
                })
                .collect())
        }

        async fn segment_reports(
            &self,
            segment_id: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<ReportBatch, FetchError> {
            *self
                .calls
                .lock()
                .unwrap()
                .entry(segment_id.to_string())
                .or_default() += 1;

            if self.failing.iter().any(|f| f == segment_id) {
                return Err(FetchError::InvalidUrl("simulated outage".into()));
            }
            Ok(ReportBatch {
                report: self.reports.get(segment_id).cloned().unwrap_or_default(),
            })
        }

        async fn traffic_snapshot(&self, _area: &str, _time: &str) -> Result<Value, FetchError> {
            Ok(json!({"features": []}))
        }
    }

    fn options() -> BatchOptions {
        let end = Utc.with_ymd_and_hms(2021, 6, 30, 0, 0, 0).unwrap();
        BatchOptions {
            window: FetchWindow::trailing(90, end).unwrap(),
            concurrency: 2,
            retry: RetryPolicy::with_max_attempts(5),
            report_policy: ReportPolicy::Skip,
        }
    }

    fn fake() -> FakeApi {
        let mut reports = HashMap::new();
        reports.insert(
            "1".to_string(),
            vec![
                json!({"date": "2021-06-01T08:15:00Z", "car": 1, "bike": 0, "pedestrian": 2}),
                json!({"date": "2021-06-01T08:45:00Z", "car": 3, "bike": 1, "pedestrian": 0}),
            ],
        );
        reports.insert(
            "2".to_string(),
            vec![json!({"date": "2021-06-01T17:00:00Z", "car": 10, "bike": 4, "pedestrian": 6})],
        );
        reports.insert("3".to_string(), vec![]);
        FakeApi {
            reports,
            failing: vec!["broken".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_window_rejects_inverted_interval() {
        let a = Utc.with_ymd_and_hms(2021, 6, 2, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap();
        assert!(FetchWindow::new(a, b).is_err());
        assert!(FetchWindow::new(b, a).is_ok());
    }

    #[test]
    fn test_trailing_window() {
        let end = Utc.with_ymd_and_hms(2021, 6, 30, 0, 0, 0).unwrap();
        let window = FetchWindow::trailing(90, end).unwrap();
        assert_eq!(window.end - window.start, TimeDelta::days(90));
    }

    #[test]
    fn test_trailing_window_rejects_overflowing_length() {
        let end = Utc.with_ymd_and_hms(2021, 6, 30, 0, 0, 0).unwrap();
        assert!(FetchWindow::trailing(i64::MAX / 1000, end).is_err());
        assert!(FetchWindow::trailing(i64::MAX, end).is_err());
        assert!(FetchWindow::trailing(-1, end).is_err());
    }

    #[tokio::test]
    async fn test_failing_segment_is_retried_then_absent() {
        let api = fake();
        let opts = options();
        let result = fetch_segment_reports(&api, "broken", opts.window, &opts.retry).await;

        assert!(result.is_none());
        assert_eq!(api.calls_for("broken"), 5);
    }

    #[tokio::test]
    async fn test_batch_excludes_only_failing_segment() {
        let api = Arc::new(fake());
        let batch = fetch_all_segments(api.clone(), &options()).await.unwrap();

        assert_eq!(batch.failed, vec!["broken".to_string()]);
        let ids: Vec<_> = batch.document.keys().cloned().collect();
        assert_eq!(ids, vec!["1", "2", "3"]);

        let eight = batch.document["1"].averages.get(8).unwrap();
        assert_eq!(eight.avg_car, 2.0);
        assert_eq!(eight.avg_bike, 0.5);
        assert_eq!(eight.avg_pedestrian, 1.0);
        assert_eq!(batch.document["1"].coordinates, Some([13.4, 52.5]));

        let five_pm = batch.document["2"].averages.get(17).unwrap();
        assert_eq!(five_pm.avg_car, 10.0);

        // Successful segments are fetched exactly once.
        assert_eq!(api.calls_for("1"), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_change_other_results() {
        let with_failure = collect_segments(
            Arc::new(fake()),
            vec![
                SegmentInfo { id: "2".into(), coordinates: [0.0, 0.0] },
                SegmentInfo { id: "broken".into(), coordinates: [0.0, 0.0] },
            ],
            &options(),
        )
        .await;
        let alone = collect_segments(
            Arc::new(fake()),
            vec![SegmentInfo { id: "2".into(), coordinates: [0.0, 0.0] }],
            &options(),
        )
        .await;

        assert_eq!(with_failure.document, alone.document);
    }

    #[tokio::test]
    async fn test_abort_policy_excludes_segment_with_bad_report() {
        let mut api = fake();
        api.reports.insert(
            "bad".to_string(),
            vec![
                json!({"date": "2021-06-01T08:00:00Z", "car": 1, "bike": 0, "pedestrian": 0}),
                json!({"date": "garbage", "car": 1, "bike": 0, "pedestrian": 0}),
            ],
        );
        let mut opts = options();
        opts.report_policy = ReportPolicy::Abort;

        let batch = fetch_all_segments(Arc::new(api), &opts).await.unwrap();
        assert!(!batch.document.contains_key("bad"));
        assert!(batch.failed.contains(&"bad".to_string()));
        assert!(batch.document.contains_key("1"));
    }

    #[tokio::test]
    async fn test_zero_concurrency_still_makes_progress() {
        let mut opts = options();
        opts.concurrency = 0;
        let batch = fetch_all_segments(Arc::new(fake()), &opts).await.unwrap();
        assert_eq!(batch.document.len(), 3);
    }

    /// Records the highest number of `segment_reports` calls running at once.
    #[derive(Default)]
    struct PeakTrackingApi {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl CountingApi for PeakTrackingApi {
        async fn list_segments(&self) -> Result<Vec<SegmentInfo>, FetchError> {
            Ok(Vec::new())
        }

        async fn segment_reports(
            &self,
            _segment_id: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<ReportBatch, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ReportBatch::default())
        }

        async fn traffic_snapshot(&self, _area: &str, _time: &str) -> Result<Value, FetchError> {
            Ok(Value::Null)
        }
    }

    /// Panics while serving `poisoned`, answers every other id normally.
    struct PanickingApi {
        poisoned: &'static str,
    }

    #[async_trait::async_trait]
    impl CountingApi for PanickingApi {
        async fn list_segments(&self) -> Result<Vec<SegmentInfo>, FetchError> {
            Ok(Vec::new())
        }

        async fn segment_reports(
            &self,
            segment_id: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<ReportBatch, FetchError> {
            if segment_id == self.poisoned {
                panic!("segment {segment_id} exploded");
            }
            Ok(ReportBatch {
                report: vec![json!({"date": "2021-06-01T12:00:00Z", "car": 7, "bike": 1, "pedestrian": 2})],
            })
        }

        async fn traffic_snapshot(&self, _area: &str, _time: &str) -> Result<Value, FetchError> {
            Ok(Value::Null)
        }
    }

    fn segment_list(ids: &[&str]) -> Vec<SegmentInfo> {
        ids.iter()
            .map(|id| SegmentInfo {
                id: id.to_string(),
                coordinates: [13.4, 52.5],
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_flight_requests_never_exceed_concurrency() {
        let api = Arc::new(PeakTrackingApi::default());
        let ids: Vec<String> = (0..12).map(|i| i.to_string()).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

        let batch = collect_segments(api.clone(), segment_list(&id_refs), &options()).await;

        assert_eq!(batch.document.len(), 12);
        let peak = api.peak.load(Ordering::SeqCst);
        assert!(peak >= 1);
        assert!(peak <= options().concurrency, "peak of {peak} concurrent calls");
    }

    #[tokio::test]
    async fn test_panicking_segment_only_drops_itself() {
        let api = Arc::new(PanickingApi { poisoned: "b" });
        let batch = collect_segments(api, segment_list(&["a", "b", "c"]), &options()).await;

        assert_eq!(batch.failed, vec!["b".to_string()]);
        assert_eq!(batch.document.keys().collect::<Vec<_>>(), vec!["a", "c"]);
        assert_eq!(batch.document["a"].averages.get(12).unwrap().avg_car, 7.0);
    }
}
