use std::collections::HashMap;

use serde::Serialize;
use tracing::info;

use crate::cache::{CacheEntry, GeoCache, ResolutionSource};
use crate::errors::AppResult;
use crate::geocode::{Coordinate, ThrottledResolver};
use crate::ingestion::ProviderRecord;
use crate::key::build_lookup_key;

const PROGRESS_LOG_EVERY: usize = 50;

/// The service location of one raw record, as handed to the geocoder.
#[derive(Debug, Clone, Default)]
pub struct ServiceLocation {
    pub municipality: Option<String>,
    pub department: Option<String>,
}

impl From<&ProviderRecord> for ServiceLocation {
    fn from(record: &ProviderRecord) -> Self {
        Self {
            municipality: record.municipality.clone(),
            department: record.department.clone(),
        }
    }
}

/// One row of the unique-key table: a distinct lookup key, how many raw
/// records share it, and how it resolved.
#[derive(Debug, Clone)]
pub struct UniqueKeyRecord {
    pub department: String,
    pub municipality: String,
    pub weight: usize,
    pub query: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub source: ResolutionSource,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GeocodeStats {
    pub total_keys: usize,
    pub cache_hits: usize,
    pub lookups: usize,
    pub resolved: usize,
    pub failed: usize,
}

pub struct GeocodeOutcome {
    pub unique: Vec<UniqueKeyRecord>,
    pub stats: GeocodeStats,
    coordinates: HashMap<String, Option<Coordinate>>,
}

impl GeocodeOutcome {
    pub fn coordinate_for(
        &self,
        municipality: Option<&str>,
        department: Option<&str>,
    ) -> Option<Coordinate> {
        let key = build_lookup_key(municipality, department);
        self.coordinates.get(&key).copied().flatten()
    }
}

/// A raw record joined (left) with the coordinates of its lookup key.
#[derive(Debug, Clone)]
pub struct EnrichedProvider {
    pub provider: ProviderRecord,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

/// Resolves the distinct lookup keys of a record set, cache first, and keeps
/// the cache durable as it goes.
pub struct BatchGeocoder {
    cache: GeoCache,
    resolver: ThrottledResolver,
}

struct KeyGroup {
    department: String,
    municipality: String,
    weight: usize,
}

impl BatchGeocoder {
    pub fn new(cache: GeoCache, resolver: ThrottledResolver) -> Self {
        Self { cache, resolver }
    }

    pub fn cache(&self) -> &GeoCache {
        &self.cache
    }

    /// Resolves every distinct key of `locations`, in first-seen order.
    ///
    /// A cached entry with coordinates short-circuits the external call; a
    /// cached failure is retried. Newly resolved (or newly failed) keys are
    /// written through to the durable cache one by one, so an interrupted
    /// run resumes from where it stopped. No single key failure is fatal.
    pub async fn geocode_all(&mut self, locations: &[ServiceLocation]) -> AppResult<GeocodeOutcome> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, KeyGroup> = HashMap::new();
        for location in locations {
            let municipality = location.municipality.as_deref().unwrap_or_default().trim();
            let department = location.department.as_deref().unwrap_or_default().trim();
            let key = build_lookup_key(Some(municipality), Some(department));
            groups
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key);
                    KeyGroup {
                        department: department.to_string(),
                        municipality: municipality.to_string(),
                        weight: 0,
                    }
                })
                .weight += 1;
        }

        let total = order.len();
        let mut stats = GeocodeStats {
            total_keys: total,
            ..GeocodeStats::default()
        };
        let mut unique = Vec::with_capacity(total);
        let mut coordinates = HashMap::with_capacity(total);

        for (index, key) in order.iter().enumerate() {
            let group = &groups[key];
            let (coordinate, source) = match self.cache.lookup(key).and_then(CacheEntry::coordinate)
            {
                Some(coordinate) => {
                    stats.cache_hits += 1;
                    (Some(coordinate), ResolutionSource::Cache)
                }
                None => {
                    stats.lookups += 1;
                    let resolved = self.resolver.resolve(key).await;
                    let entry = match resolved {
                        Some(coordinate) => CacheEntry::resolved(
                            key.clone(),
                            coordinate,
                            ResolutionSource::Nominatim,
                        ),
                        None => CacheEntry::failed(key.clone()),
                    };
                    let source = entry.source;
                    self.cache.put(entry)?;
                    (resolved, source)
                }
            };

            if coordinate.is_some() {
                stats.resolved += 1;
            } else {
                stats.failed += 1;
            }
            coordinates.insert(key.clone(), coordinate);
            unique.push(UniqueKeyRecord {
                department: group.department.clone(),
                municipality: group.municipality.clone(),
                weight: group.weight,
                query: key.clone(),
                lat: coordinate.map(|c| c.lat),
                lon: coordinate.map(|c| c.lon),
                source,
            });

            let processed = index + 1;
            if processed % PROGRESS_LOG_EVERY == 0 {
                info!(processed, total, resolved = stats.resolved, "geocoding progress");
            }
        }

        info!(
            total_keys = stats.total_keys,
            cache_hits = stats.cache_hits,
            lookups = stats.lookups,
            resolved = stats.resolved,
            failed = stats.failed,
            "geocoding finished"
        );
        Ok(GeocodeOutcome {
            unique,
            stats,
            coordinates,
        })
    }
}

/// Left join of the raw record set onto the resolved keys. Records whose key
/// never resolved (or, defensively, was never processed) keep absent
/// coordinates and are retained.
pub fn attach_coordinates(
    providers: &[ProviderRecord],
    outcome: &GeocodeOutcome,
) -> Vec<EnrichedProvider> {
    providers
        .iter()
        .map(|provider| {
            let coordinate = outcome
                .coordinate_for(provider.municipality.as_deref(), provider.department.as_deref());
            EnrichedProvider {
                provider: provider.clone(),
                lat: coordinate.map(|c| c.lat),
                lon: coordinate.map(|c| c.lon),
            }
        })
        .collect()
}
