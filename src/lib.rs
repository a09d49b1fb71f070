pub mod batch;
pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod export;
pub mod geocode;
pub mod heatmap;
pub mod ingestion;
pub mod key;
pub mod kpi;
pub mod telemetry;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use batch::{
    attach_coordinates, BatchGeocoder, EnrichedProvider, GeocodeOutcome, GeocodeStats,
    ServiceLocation, UniqueKeyRecord,
};
pub use cache::{CacheEntry, GeoCache, ResolutionSource};
pub use config::{AppConfig, GeocoderConfig};
pub use db::{bootstrap, open_existing, DatabaseContext};
pub use errors::{AppError, AppResult};
pub use geocode::{Coordinate, GeocodeLookup, NominatimClient, ThrottledResolver};
pub use heatmap::{aggregate, WeightedPoint};
pub use ingestion::{parse_registry, persist_rows, ImportSummary, ParsedRegistry, ProviderRecord};
pub use key::build_lookup_key;
pub use telemetry::RunLog;

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,rups_coverage=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}
