//! CLI entry point for the trip feed tool.
//!
//! Provides subcommands for flattening a one-off snapshot of a cooperative's
//! in-progress trips and for following them live.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use trip_feed::{
    config::Config,
    fetch::{BasicClient, fetch_bytes},
    flatten::TripView,
    output::{TripRow, append_record, append_records, print_json, print_pretty},
    realtime::FirebaseStore,
    stats::FeedStats,
    subscription::{
        ConnectionStatus, FeedState, StalenessAlarm, TripFeed, fetch_cooperative_snapshot, validate_cooperative_id,
    },
};

#[derive(Parser)]
#[command(name = "trip_feed")]
#[command(about = "Follow the in-progress trips of a cooperative", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the current trips of a cooperative once and flatten them
    Snapshot {
        /// Cooperative whose trips to read
        cooperative: String,

        /// JSON file or URL to read instead of the configured store
        #[arg(short, long, value_name = "FILE_OR_URL")]
        source: Option<String>,

        /// CSV file to append one row per trip to
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Subscribe to a cooperative and log every pushed update
    Watch {
        /// Cooperative whose trips to follow
        cooperative: String,

        /// Only show the trip of this driver
        #[arg(short, long)]
        driver: Option<String>,

        /// CSV file to append per-update statistics to
        #[arg(short, long)]
        stats: Option<String>,

        /// Seconds without any server message before the feed counts as stale
        #[arg(long, default_value_t = 120)]
        max_staleness: u64,

        /// Stop after this many updates (0 = run until Ctrl+C)
        #[arg(short = 'n', long, default_value_t = 0)]
        updates: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/trip_feed.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("trip_feed.log"));

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
    let config = Config::from_env()?;

    match cli.command {
        Commands::Snapshot {
            cooperative,
            source,
            output,
        } => {
            snapshot(&config, &cooperative, source.as_deref(), output.as_deref()).await?;
        }
        Commands::Watch {
            cooperative,
            driver,
            stats,
            max_staleness,
            updates,
        } => {
            watch(
                &config,
                &cooperative,
                driver.as_deref(),
                stats.as_deref(),
                max_staleness,
                updates,
            )
            .await?;
        }
    }

    Ok(())
}

/// Loads the raw subtree from a local file, an explicit URL, or the store.
#[tracing::instrument(skip(config))]
async fn load_snapshot(config: &Config, cooperative: &str, source: Option<&str>) -> Result<Value> {
    match source {
        Some(url) if url.starts_with("http") => {
            let client = BasicClient::new();
            let bytes = fetch_bytes(&client, url).await?;
            serde_json::from_slice(&bytes).context("Response is not JSON")
        }
        Some(path) => {
            let bytes = std::fs::read(path).with_context(|| format!("Failed to read {path}"))?;
            serde_json::from_slice(&bytes).with_context(|| format!("{path} is not JSON"))
        }
        None => {
            let client = config.http_client()?;
            fetch_cooperative_snapshot(
                &client,
                config.require_database_url()?,
                &config.root,
                cooperative,
            )
            .await
        }
    }
}

async fn snapshot(
    config: &Config,
    cooperative: &str,
    source: Option<&str>,
    output: Option<&str>,
) -> Result<()> {
    let Some(cooperative) = validate_cooperative_id(cooperative)? else {
        warn!("No cooperative given, nothing to read");
        print_json(&TripView::default())?;
        return Ok(());
    };
    let cooperative = cooperative.as_str();

    let raw = load_snapshot(config, cooperative, source).await?;
    let trips = TripView::from_snapshot(&raw);

    let stats = FeedStats::from_trips(Some(&raw), &trips).with_cooperative(cooperative);
    info!(
        cooperative,
        driver_entries = stats.driver_entries,
        active_trips = stats.active_trips,
        awaiting_fix = stats.awaiting_fix,
        "Snapshot flattened"
    );
    print_json(&trips)?;

    if let Some(path) = output {
        let rows: Vec<TripRow> = trips.iter().map(TripRow::from).collect();
        append_records(path, &rows)?;
        info!(path, rows = rows.len(), "Trips written");
    }

    Ok(())
}

#[tracing::instrument(skip(config, stats_path))]
async fn watch(
    config: &Config,
    cooperative: &str,
    driver: Option<&str>,
    stats_path: Option<&str>,
    max_staleness: u64,
    updates: usize,
) -> Result<()> {
    let mut staleness = StalenessAlarm::new(max_staleness)?;
    let store = FirebaseStore::new(
        config.http_client()?,
        config.require_database_url()?,
        config.idle_timeout,
    );
    let mut feed = TripFeed::subscribe(
        Arc::new(store),
        cooperative,
        config.subscription_options(),
    )?;

    if feed.current().status == ConnectionStatus::Idle {
        warn!("No cooperative given, nothing to watch");
        return Ok(());
    }

    let check_period = Duration::from_secs(5);
    let mut staleness_check =
        tokio::time::interval_at(tokio::time::Instant::now() + check_period, check_period);
    let mut last_revision = 0;
    let mut seen = 0;

    loop {
        tokio::select! {
            changed = feed.changed() => {
                let Some(state) = changed else {
                    info!("Subscription ended");
                    break;
                };

                if let ConnectionStatus::Failed { reason } = &state.status {
                    error!(reason = %reason, "Subscription failed");
                    if let Some(path) = stats_path {
                        append_record(path, &FeedStats::from_error("subscription_failed", reason)
                            .with_cooperative(cooperative))?;
                    }
                    continue;
                }

                if state.revision == last_revision {
                    info!(status = ?state.status, "Connection status changed");
                    continue;
                }
                last_revision = state.revision;

                report(&state, cooperative, driver, stats_path)?;

                seen += 1;
                if updates > 0 && seen >= updates {
                    info!(updates = seen, "Update limit reached");
                    break;
                }
            }
            _ = staleness_check.tick() => {
                let state = feed.current();
                if staleness.observe(&state, Utc::now()) {
                    warn!(
                        status = ?state.status,
                        last_seen = ?state.last_seen,
                        "Trip feed is stale"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    feed.close();
    Ok(())
}

fn report(
    state: &FeedState,
    cooperative: &str,
    driver: Option<&str>,
    stats_path: Option<&str>,
) -> Result<()> {
    match driver {
        Some(driver_id) => match state.trips.for_driver(driver_id) {
            Some(trip) => match trip.driver_position() {
                Some((lat, lon)) => info!(
                    driver_id,
                    trip_id = %trip.id,
                    status = %trip.status_viagem,
                    lat,
                    lon,
                    "Driver position"
                ),
                None => info!(
                    driver_id,
                    trip_id = %trip.id,
                    status = %trip.status_viagem,
                    "Awaiting driver location"
                ),
            },
            None => info!(driver_id, "Driver has no trip in progress"),
        },
        None => {
            info!(
                revision = state.revision,
                active_trips = state.trips.len(),
                "Trip list updated"
            );
            print_json(&state.trips)?;
        }
    }

    let stats = FeedStats::from_trips(Some(state.snapshot.as_ref()), &state.trips)
        .with_cooperative(cooperative)
        .with_revision(state.revision);
    print_pretty(&stats);

    if let Some(path) = stats_path {
        append_record(path, &stats)?;
    }

    Ok(())
}
