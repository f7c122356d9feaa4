//! Point-in-time traffic snapshots, one file per district.

use anyhow::{Context, Result};
use geo::Rect;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::fetch::{RetryPolicy, with_retry};
use crate::geography::{District, DistrictSet};
use crate::output::write_json;
use crate::services::counting_api::CountingApi;

/// Outcome of a snapshot run.
#[derive(Debug, Default)]
pub struct SnapshotSummary {
    pub written: Vec<PathBuf>,
    pub failed: Vec<String>,
}

/// Formats district bounds as the API's area string.
///
/// The maxima come first: `"max_x,max_y,min_x,min_y"`.
pub fn area_string(bounds: Rect<f64>) -> String {
    let (a, b) = bounds.min().x_y();
    let (c, d) = bounds.max().x_y();
    format!("{},{},{},{}", a.max(c), b.max(d), a.min(c), b.min(d))
}

/// Downloads the snapshot for one district, retrying per `retry`.
/// Returns `None` when every attempt failed.
async fn download_district<A: CountingApi + ?Sized>(
    api: &A,
    district: &District,
    time: &str,
    retry: &RetryPolicy,
) -> Option<serde_json::Value> {
    let Some(bounds) = district.bounds() else {
        warn!(district = %district.name, "District has an empty boundary");
        return None;
    };
    let area = area_string(bounds);
    info!(district = %district.name, area = %area, "Requesting snapshot");

    match with_retry(retry, |_| api.traffic_snapshot(&area, time)).await {
        Ok(data) => Some(data),
        Err(e) => {
            error!(district = %district.name, error = %e, "Error retrieving data for district");
            None
        }
    }
}

/// Pulls one snapshot per district and writes each to `<out_dir>/<name>.json`.
///
/// Districts whose download fails after all retries are skipped and
/// listed in [`SnapshotSummary::failed`]; I/O errors abort the run.
#[tracing::instrument(skip(api, districts, retry), fields(district_count = districts.len()))]
pub async fn download_snapshots<A: CountingApi + ?Sized>(
    api: &A,
    districts: &DistrictSet,
    time: &str,
    out_dir: &Path,
    retry: &RetryPolicy,
) -> Result<SnapshotSummary> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let mut summary = SnapshotSummary::default();

    for district in districts.iter() {
        let started = Instant::now();
        let Some(data) = download_district(api, district, time, retry).await else {
            summary.failed.push(district.name.clone());
            continue;
        };

        let features = data["features"].as_array().map_or(0, Vec::len);
        let path = out_dir.join(snapshot_file_name(&district.name));
        write_json(&path, &data)?;

        info!(
            district = %district.name,
            features,
            elapsed_ms = started.elapsed().as_millis() as u64,
            path = %path.display(),
            "Snapshot written"
        );
        summary.written.push(path);
    }

    Ok(summary)
}

/// `<district>.json`, with path separators in the name replaced so the
/// file always lands directly inside the output directory.
fn snapshot_file_name(district: &str) -> String {
    let safe: String = district
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    format!("{safe}.json")
}
