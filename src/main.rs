//! CLI entry point for the transit telemetry pipeline.
//!
//! Provides subcommands for one-shot feed analysis, continuous polling with
//! layered storage and CSV export, and ad-hoc weather lookups.

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use transit_sentinel::{
    decoder::FeedDecoder,
    enrich::WeatherEnrichment,
    fetch::{BasicClient, FeedSource, HttpFeedSource, StaticFeedSource, fetch_bytes},
    pipeline::FeedPipeline,
    quality::{QualityConfig, QualityGate},
    report::{append_records, export_store},
    sink::LogSink,
    store::LayeredStore,
};

#[derive(Parser)]
#[command(name = "transit_sentinel")]
#[command(about = "GTFS-RT telemetry pipeline with layered quality gating", long_about = None)]
struct Cli {
    /// Path to a JSON quality configuration file (thresholds and agency bounds)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode and validate a single feed snapshot from a file or URL
    Analyze {
        /// Path to file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        /// Agency the feed belongs to
        #[arg(short, long, default_value = "default")]
        agency: String,

        /// CSV file to append quality alerts to
        #[arg(short, long, default_value = "alerts.csv")]
        output: String,
    },
    /// Poll a feed continuously, promoting and aggregating each cycle
    Poll {
        /// Path to file or URL to fetch each cycle
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        /// Agency the feed belongs to
        #[arg(short, long, default_value = "default")]
        agency: String,

        /// Seconds between poll cycles
        #[arg(short, long, default_value_t = 60)]
        interval: u64,

        /// Number of cycles to run (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 1)]
        samples: usize,

        /// Directory to export layer snapshots into after each cycle
        #[arg(short, long, default_value = "data")]
        export_dir: String,

        /// Optional service-area centroid for weather enrichment
        #[arg(long, requires = "weather_lon")]
        weather_lat: Option<f64>,
        #[arg(long, requires = "weather_lat")]
        weather_lon: Option<f64>,
    },
    /// Fetch current weather conditions for a location
    Weather {
        #[arg(long)]
        lat: f64,
        #[arg(long)]
        lon: f64,

        /// Agency to tag the observation with
        #[arg(short, long, default_value = "default")]
        agency: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/transit_sentinel.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("transit_sentinel.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => QualityConfig::from_file(path)?,
        None => QualityConfig::default(),
    };

    match cli.command {
        Commands::Analyze {
            source,
            agency,
            output,
        } => {
            let bytes = fetcher(&source).await?;
            let decoder = FeedDecoder::new(&agency);
            let decoded = decoder.decode(&bytes)?;
            info!(
                positions = decoded.positions.len(),
                trip_updates = decoded.trip_updates.len(),
                skipped = decoded.skipped_entities,
                "Feed decoded"
            );

            let now = Utc::now();
            let mut store = LayeredStore::new(QualityGate::new(config));
            store.append_raw_positions(&decoded.positions, now);
            store.append_raw_trip_updates(&decoded.trip_updates, now);
            let outcome = store.promote(now);

            info!(
                promoted_positions = outcome.promoted_positions,
                promoted_trip_updates = outcome.promoted_trip_updates,
                rejected = outcome.rejected,
                dropped_stale = outcome.dropped_stale,
                duplicates = outcome.duplicates,
                "Snapshot validated"
            );
            if !outcome.alerts.is_empty() {
                append_records(&output, &outcome.alerts)?;
                info!(alerts = outcome.alerts.len(), output, "Alerts written");
            }
        }
        Commands::Poll {
            source,
            agency,
            interval,
            samples,
            export_dir,
            weather_lat,
            weather_lon,
        } => {
            poll_feed(
                &source,
                &agency,
                interval,
                samples,
                &export_dir,
                config,
                weather_lat.zip(weather_lon),
            )
            .await?;
        }
        Commands::Weather { lat, lon, agency } => {
            let mut enrichment = WeatherEnrichment::new(BasicClient::new());
            match enrichment.current_observation(lat, lon, &agency).await? {
                Some(observation) => {
                    info!(
                        temperature_celsius = observation.temperature_celsius,
                        wind_speed_kmh = observation.wind_speed_kmh,
                        precipitation_mm = observation.precipitation_mm,
                        condition = ?observation.weather_condition,
                        "Current conditions"
                    );
                }
                None => warn!(lat, lon, "No current weather available"),
            }
        }
    }

    Ok(())
}

/// Loads feed data from a local file path or fetches it over HTTP.
#[tracing::instrument(fields(source = %url))]
async fn fetcher(url: &str) -> Result<Vec<u8>> {
    let bytes = if url.starts_with("http") {
        let client = BasicClient::new();
        fetch_bytes(&client, url).await?
    } else {
        std::fs::read(url)?
    };
    Ok(bytes)
}

/// Runs the pipeline on an interval, exporting layer snapshots after each
/// cycle. A failed cycle is logged and counted, never fatal.
#[tracing::instrument(skip(config, weather_location), fields(source, agency, interval, samples))]
async fn poll_feed(
    source: &str,
    agency: &str,
    interval: u64,
    samples: usize,
    export_dir: &str,
    config: QualityConfig,
    weather_location: Option<(f64, f64)>,
) -> Result<()> {
    let feed_source: Box<dyn FeedSource> = if source.starts_with("http") {
        Box::new(HttpFeedSource::new(BasicClient::new(), source, 3))
    } else {
        Box::new(StaticFeedSource::new(std::fs::read(source)?))
    };

    let mut pipeline = FeedPipeline::new(
        feed_source,
        LogSink,
        FeedDecoder::new(agency),
        LayeredStore::new(QualityGate::new(config)),
    );
    let mut enrichment = weather_location.map(|_| WeatherEnrichment::new(BasicClient::new()));

    if samples == 0 {
        info!(interval, "Polling infinitely. Press Ctrl+C to stop.");
    } else {
        info!(samples, interval, "Starting poll loop");
    }

    let mut cycle = 0usize;
    loop {
        if samples > 0 && cycle >= samples {
            break;
        }
        cycle += 1;

        if let (Some(enrichment), Some((lat, lon))) = (enrichment.as_mut(), weather_location) {
            match enrichment.current_observation(lat, lon, agency).await {
                Ok(Some(observation)) => {
                    pipeline.ingest_weather(observation).await?;
                }
                Ok(None) => warn!(lat, lon, "No current weather available"),
                Err(e) => warn!(error = %e, "Weather fetch failed, continuing without it"),
            }
        }

        match pipeline.poll_once().await {
            Ok(outcome) => {
                info!(
                    cycle,
                    promoted = outcome.promoted_positions + outcome.promoted_trip_updates,
                    rejected = outcome.rejected,
                    duplicates = outcome.duplicates,
                    metric_buckets = outcome.metric_buckets,
                    "Cycle complete"
                );
            }
            Err(e) => {
                tracing::error!(cycle, error = %e, "Cycle failed");
            }
        }

        export_store(pipeline.store(), export_dir, agency, Utc::now().date_naive())?;

        if samples == 0 || cycle < samples {
            tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
        }
    }

    let stats = pipeline.stats();
    info!(
        total_polls = stats.total_polls,
        success_rate = stats.success_rate(),
        promoted = stats.promoted_records,
        rejected = stats.rejected_records,
        "Poll loop finished"
    );
    Ok(())
}
