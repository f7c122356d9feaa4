use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::analyzers::hourly::hourly_averages;
use crate::analyzers::types::{SegmentSummary, SegmentsDocument};
use crate::parser::{ReportBatch, ReportPolicy, parse_reports};

/// Aggregates a folder of per-segment report files into a segments document.
///
/// Each `<segment id>.json` file holds `{"report": [...]}`. Files that
/// cannot be read or parsed are logged and left out; an empty JSON
/// object is treated as "no data" and skipped as well.
#[tracing::instrument(skip(dir), fields(dir = %dir.display()))]
pub fn aggregate_folder(dir: &Path, policy: ReportPolicy) -> Result<SegmentsDocument> {
    let mut document = SegmentsDocument::new();

    for (segment_id, path) in load_segment_files(dir)? {
        match load_segment(&path, policy) {
            Ok(Some(summary)) => {
                document.insert(segment_id, summary);
            }
            Ok(None) => debug!(segment_id, "Empty segment file, skipping"),
            Err(e) => error!(segment_id, error = %e, "Failed to aggregate segment file"),
        }
    }

    info!(segments = document.len(), "Folder aggregation complete");
    Ok(document)
}

/// `(segment id, path)` of every `*.json` file in `dir`, sorted by id.
///
/// The id is the file name up to its first dot.
fn load_segment_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();

        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            warn!(path = %path.display(), "Skipping non UTF-8 file name");
            continue;
        };
        if let Some(id) = file_name.split('.').next().filter(|id| !id.is_empty()) {
            files.push((id.to_string(), path.clone()));
        }
    }

    files.sort();
    Ok(files)
}

fn load_segment(path: &Path, policy: ReportPolicy) -> Result<Option<SegmentSummary>> {
    let text = fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;

    if value.as_object().is_some_and(|o| o.is_empty()) {
        return Ok(None);
    }

    let batch: ReportBatch = serde_json::from_value(value)?;
    let reports = parse_reports(batch, policy)?;

    Ok(Some(SegmentSummary {
        averages: hourly_averages(&reports),
        coordinates: None,
    }))
}
