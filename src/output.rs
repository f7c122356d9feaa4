//! Persistence of segment documents, snapshots and GeoJSON files.
//!
//! JSON documents are written with four-space indentation and non-ASCII
//! text kept verbatim, matching the files the dashboard already reads.

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

use crate::analyzers::types::{HourlyRow, SegmentsDocument};

fn create(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Writes `value` as compact JSON.
pub fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let mut writer = create(path)?;
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    debug!(path = %path.display(), "JSON written");
    Ok(())
}

/// Writes `value` as JSON indented by four spaces.
pub fn write_pretty_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let mut writer = create(path)?;
    let mut ser = serde_json::Serializer::with_formatter(&mut writer, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut ser)?;
    writer.flush()?;
    debug!(path = %path.display(), "Pretty JSON written");
    Ok(())
}

pub fn write_segments_document(path: &Path, document: &SegmentsDocument) -> Result<()> {
    write_pretty_json(path, document)
}

/// Writes one CSV row per segment and hour.
pub fn write_hourly_csv(path: &Path, document: &SegmentsDocument) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .has_headers(true)
        .from_writer(create(path)?);

    for (segment_id, summary) in document {
        for (hour, avg) in summary.averages.iter() {
            writer.serialize(HourlyRow {
                segment_id,
                hour,
                avg_car: avg.avg_car,
                avg_bike: avg.avg_bike,
                avg_pedestrian: avg.avg_pedestrian,
            })?;
        }
    }

    writer.flush()?;
    debug!(path = %path.display(), segments = document.len(), "CSV written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::types::{HourlyTable, SegmentSummary};
    use std::env;
    use std::fs;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        env::temp_dir().join(name)
    }

    fn document() -> SegmentsDocument {
        let mut doc = SegmentsDocument::new();
        doc.insert(
            "9000001".to_string(),
            SegmentSummary {
                averages: HourlyTable::default(),
                coordinates: Some([13.4, 52.5]),
            },
        );
        doc
    }

    #[test]
    fn test_segments_document_shape() {
        let path = temp_path("berlin_traffic_test_document.json");
        write_segments_document(&path, &document()).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\n    \"9000001\": {"));

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["9000001"]["coordinates"][0], 13.4);
        assert_eq!(value["9000001"]["averages"]["23"]["avg_pedestrian"], 0.0);

        let parsed: SegmentsDocument = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, document());

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_pretty_json_keeps_umlauts() {
        let path = temp_path("berlin_traffic_test_umlaut.json");
        write_pretty_json(&path, &serde_json::json!({"name": "Neukölln"})).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("Neukölln"));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_hourly_csv_has_header_and_24_rows_per_segment() {
        let path = temp_path("berlin_traffic_test_hourly.csv");
        write_hourly_csv(&path, &document()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines[0], "segment_id,hour,avg_car,avg_bike,avg_pedestrian");
        assert_eq!(lines.len(), 25);
        assert_eq!(lines[1], "9000001,0,0.0,0.0,0.0");

        fs::remove_file(&path).unwrap();
    }
}
