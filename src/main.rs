use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};

use rups_coverage::{
    attach_coordinates, batch::BatchGeocoder, cache::GeoCache, config::AppConfig, db, export,
    geocode::{NominatimClient, ThrottledResolver},
    heatmap, ingestion, kpi, telemetry::RunLog, ServiceLocation,
};

#[derive(Parser)]
#[command(
    name = "rups",
    version,
    about = "Coverage analytics for the Colombian public-utility provider registry"
)]
struct Cli {
    /// SQLite provider store.
    #[arg(long, default_value = "database/rups.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load the registry CSV into the provider store.
    Ingest {
        /// Registry CSV file (RUPS export).
        #[arg(long)]
        input: PathBuf,
        /// Drop previously ingested rows first.
        #[arg(long)]
        replace: bool,
    },
    /// Geocode service municipalities and export coverage tables plus the heatmap.
    Geocode {
        #[arg(long, default_value = "reports")]
        reports_dir: PathBuf,
        #[arg(long, default_value = "images")]
        images_dir: PathBuf,
        /// Include providers whose status is not OPERATIVA.
        #[arg(long)]
        all_statuses: bool,
    },
    /// Export per-department service coverage statistics.
    Report {
        #[arg(long, default_value = "reports")]
        reports_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rups_coverage::init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::from_env();

    match cli.command {
        Command::Ingest { input, replace } => run_ingest(&cli.db, &input, replace, &config),
        Command::Geocode {
            reports_dir,
            images_dir,
            all_statuses,
        } => run_geocode(&cli.db, &reports_dir, &images_dir, all_statuses, &config).await,
        Command::Report { reports_dir } => run_report(&cli.db, &reports_dir, &config),
    }
}

fn run_ingest(
    db_path: &Path,
    input: &Path,
    replace: bool,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let ctx = db::bootstrap(db_path)?;
    let run_log = RunLog::new(data_dir(db_path), config)?;

    let parsed = ingestion::parse_registry(input)
        .with_context(|| format!("failed to read registry CSV at {}", input.display()))?;

    let mut connection = ctx.connection;
    if replace {
        let removed = db::clear_providers(&connection)?;
        info!(removed, "cleared provider store before re-ingest");
    }
    let summary = ingestion::persist_rows(&mut connection, &parsed.rows)?;
    info!(
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        skipped = parsed.skipped,
        "registry ingested"
    );

    run_log.record(
        "ingest_finished",
        json!({
            "inserted": summary.inserted,
            "duplicates": summary.duplicates,
            "skipped": parsed.skipped,
        }),
    )?;
    run_log.flush()?;
    Ok(())
}

async fn run_geocode(
    db_path: &Path,
    reports_dir: &Path,
    images_dir: &Path,
    all_statuses: bool,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let ctx = db::open_existing(db_path)?;
    let run_log = RunLog::new(data_dir(db_path), config)?;

    let only_operational = config.only_operational && !all_statuses;
    let providers = db::load_located_providers(&ctx.connection, only_operational)?;
    if providers.is_empty() {
        warn!("no providers with a service location; nothing to geocode");
        return Ok(());
    }
    info!(
        rows = providers.len(),
        only_operational, "geocoding provider service municipalities"
    );

    let cache = GeoCache::load(reports_dir.join(export::CACHE_FILE));
    let client = NominatimClient::new(&config.geocoder)?;
    let resolver = ThrottledResolver::new(Arc::new(client), &config.geocoder);
    let mut geocoder = BatchGeocoder::new(cache, resolver);

    let locations: Vec<ServiceLocation> = providers.iter().map(Into::into).collect();
    let outcome = geocoder.geocode_all(&locations).await?;

    export::write_unique_keys(reports_dir.join(export::UNIQUE_KEYS_FILE), &outcome.unique)?;
    let enriched = attach_coordinates(&providers, &outcome);
    export::write_enriched(reports_dir.join(export::ENRICHED_FILE), &enriched)?;

    let points = heatmap::aggregate(enriched.iter().map(|row| (row.lat, row.lon)));
    if points.is_empty() {
        warn!("no geocoded points; skipping heatmap render");
    } else {
        export::render_heatmap(images_dir.join(export::HEATMAP_FILE), &points)?;
    }

    info!(
        resolved = outcome.stats.resolved,
        total = outcome.stats.total_keys,
        "geocoding run complete"
    );
    run_log.record("geocode_finished", serde_json::to_value(&outcome.stats)?)?;
    run_log.flush()?;
    Ok(())
}

fn run_report(db_path: &Path, reports_dir: &Path, config: &AppConfig) -> anyhow::Result<()> {
    let ctx = db::open_existing(db_path)?;
    let run_log = RunLog::new(data_dir(db_path), config)?;

    let providers = db::load_providers(&ctx.connection)?;
    let coverage = kpi::department_coverage(&providers);
    export::write_department_coverage(reports_dir.join(export::COVERAGE_FILE), &coverage)?;
    info!(
        providers = providers.len(),
        departments = coverage.len(),
        "coverage report complete"
    );

    run_log.record(
        "report_finished",
        json!({
            "providers": providers.len(),
            "departments": coverage.len(),
        }),
    )?;
    run_log.flush()?;
    Ok(())
}

fn data_dir(db_path: &Path) -> PathBuf {
    match db_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
