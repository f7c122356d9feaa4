//! CLI entry point for the Berlin traffic tooling.
//!
//! Provides subcommands for fetching and aggregating Telraam segment
//! counts, pulling per-district snapshots, reprojecting point files and
//! filtering features by district.

use anyhow::{Context, Result};
use berlin_traffic::analyzers::analyzer::aggregate_folder;
use berlin_traffic::analyzers::types::SegmentsDocument;
use berlin_traffic::config::Settings;
use berlin_traffic::fetch::RetryPolicy;
use berlin_traffic::fetch::retry::DEFAULT_MAX_ATTEMPTS;
use berlin_traffic::geography::{DistrictSet, parse_collection, reproject_points};
use berlin_traffic::infra::telraam::client::TelraamClient;
use berlin_traffic::output::{write_hourly_csv, write_json, write_pretty_json, write_segments_document};
use berlin_traffic::parser::ReportPolicy;
use berlin_traffic::segments::{
    BatchOptions, DEFAULT_CONCURRENCY, DEFAULT_WINDOW_DAYS, FetchWindow, fetch_all_segments,
};
use berlin_traffic::snapshot::download_snapshots;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "berlin_traffic")]
#[command(about = "Fetch, aggregate and map Berlin traffic counts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every Telraam segment and write hourly averages
    FetchSegments {
        /// JSON file to write the segments document to
        #[arg(short, long, default_value = "fetched_segments_data.json")]
        output: PathBuf,

        /// Optional flat CSV export of the same averages
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Number of trailing days to request for each segment
        #[arg(short, long, default_value_t = DEFAULT_WINDOW_DAYS)]
        days: i64,

        /// Maximum number of concurrent segment downloads
        #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY)]
        concurrency: usize,

        /// Attempts per request before a segment is given up
        #[arg(short, long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
        retries: u32,

        /// How to treat a malformed report
        #[arg(long, value_enum, default_value_t = ReportPolicy::Skip)]
        report_policy: ReportPolicy,
    },
    /// Aggregate a folder of per-segment report files
    Aggregate {
        /// Directory containing `<segment id>.json` files
        #[arg(short = 'd', long, default_value = "segment_traffic_data")]
        data_dir: PathBuf,

        /// JSON file to write the segments document to
        #[arg(short, long, default_value = "fetched_segments_data.json")]
        output: PathBuf,

        /// Optional flat CSV export of the same averages
        #[arg(long)]
        csv: Option<PathBuf>,

        /// How to treat a malformed report
        #[arg(long, value_enum, default_value_t = ReportPolicy::Skip)]
        report_policy: ReportPolicy,
    },
    /// Download a traffic snapshot for every district
    Snapshot {
        /// District boundary GeoJSON
        #[arg(long, default_value = "bezirksgrenzen.geojson")]
        districts: PathBuf,

        /// Snapshot time passed to the API (e.g. "2024-06-01 12:00:00Z")
        #[arg(short, long)]
        time: String,

        /// Directory to write `<district>.json` files to
        #[arg(short, long, default_value = "results")]
        output_dir: PathBuf,

        /// Attempts per district before it is given up
        #[arg(short, long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
        retries: u32,
    },
    /// Convert Point features from EPSG:25833 to EPSG:4326
    Reproject {
        #[arg(short, long, default_value = "polizeiabschnitte.geojson")]
        input: PathBuf,

        #[arg(short, long, default_value = "converted_police_precincts.geojson")]
        output: PathBuf,
    },
    /// Keep only the features lying inside one district
    Filter {
        /// District boundary GeoJSON
        #[arg(long, default_value = "bezirksgrenzen.geojson")]
        districts: PathBuf,

        /// Name of the district (Gemeinde_name)
        #[arg(short = 'n', long)]
        district: String,

        /// GeoJSON feature collection to filter
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },
    /// List district names and bounding boxes
    Districts {
        #[arg(long, default_value = "bezirksgrenzen.geojson")]
        districts: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/berlin_traffic.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("berlin_traffic.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::FetchSegments {
            output,
            csv,
            days,
            concurrency,
            retries,
            report_policy,
        } => {
            let settings = Settings::from_env()?;
            let client = TelraamClient::new(&settings.api_key, &settings.base_url)?;

            let options = BatchOptions {
                window: FetchWindow::trailing(days, Utc::now())?,
                concurrency,
                retry: RetryPolicy::with_max_attempts(retries),
                report_policy,
            };
            info!(
                start = %options.window.start,
                end = %options.window.end,
                concurrency,
                "Fetching all segments"
            );

            let batch = fetch_all_segments(Arc::new(client), &options).await?;
            if !batch.failed.is_empty() {
                warn!(failed = ?batch.failed, "Some segments had no data");
            }
            write_outputs(&batch.document, &output, csv.as_deref())?;
        }
        Commands::Aggregate {
            data_dir,
            output,
            csv,
            report_policy,
        } => {
            let started = Instant::now();
            let document = aggregate_folder(&data_dir, report_policy)?;
            info!(
                segments = document.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "All segments data processed"
            );
            write_outputs(&document, &output, csv.as_deref())?;
        }
        Commands::Snapshot {
            districts,
            time,
            output_dir,
            retries,
        } => {
            let settings = Settings::from_env()?;
            let client = TelraamClient::new(&settings.api_key, &settings.base_url)?;
            let set = DistrictSet::load(&districts)?;

            let summary = download_snapshots(
                &client,
                &set,
                &time,
                &output_dir,
                &RetryPolicy::with_max_attempts(retries),
            )
            .await?;
            info!(
                written = summary.written.len(),
                failed = ?summary.failed,
                "Snapshot run finished"
            );
        }
        Commands::Reproject { input, output } => {
            let text = std::fs::read_to_string(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let mut collection = parse_collection(&text)?;
            let converted = reproject_points(&mut collection)?;
            write_pretty_json(&output, &collection)?;
            info!(converted, output = %output.display(), "Transformed GeoJSON saved");
        }
        Commands::Filter {
            districts,
            district,
            input,
            output,
        } => {
            let started = Instant::now();
            let set = DistrictSet::load(&districts)?;
            let target = set.get(&district)?;

            let text = std::fs::read_to_string(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let collection = parse_collection(&text)?;
            let inside = target.filter(&collection);

            write_json(&output, &inside)?;
            info!(
                district = %target.name,
                total = collection.features.len(),
                inside = inside.features.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Features filtered"
            );
        }
        Commands::Districts { districts } => {
            let set = DistrictSet::load(&districts)?;
            for district in set.iter() {
                match district.bounds() {
                    Some(b) => info!(
                        name = %district.name,
                        min_x = b.min().x,
                        min_y = b.min().y,
                        max_x = b.max().x,
                        max_y = b.max().y,
                        "District"
                    ),
                    None => info!(name = %district.name, "District without extent"),
                }
            }
            info!(total = set.len(), "District list summary");
        }
    }

    Ok(())
}

fn write_outputs(document: &SegmentsDocument, output: &Path, csv: Option<&Path>) -> Result<()> {
    write_segments_document(output, document)?;
    info!(segments = document.len(), path = %output.display(), "Segments document written");

    if let Some(csv) = csv {
        write_hourly_csv(csv, document)?;
        info!(path = %csv.display(), "Hourly CSV written");
    }
    Ok(())
}
