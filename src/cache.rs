use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use tracing::{debug, warn};

use crate::errors::AppResult;
use crate::geocode::Coordinate;

/// Provenance of a resolved key, persisted alongside its coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Cache,
    Nominatim,
    Fail,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::Cache => "cache",
            ResolutionSource::Nominatim => "nominatim",
            ResolutionSource::Fail => "fail",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "cache" => Some(ResolutionSource::Cache),
            "nominatim" => Some(ResolutionSource::Nominatim),
            "fail" => Some(ResolutionSource::Fail),
            _ => None,
        }
    }
}

/// One durable cache row. Coordinates are absent exactly when the key failed
/// to resolve.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub address: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub source: ResolutionSource,
}

impl CacheEntry {
    pub fn resolved(address: String, coordinate: Coordinate, source: ResolutionSource) -> Self {
        Self {
            address,
            lat: Some(coordinate.lat),
            lon: Some(coordinate.lon),
            source,
        }
    }

    pub fn failed(address: String) -> Self {
        Self {
            address,
            lat: None,
            lon: None,
            source: ResolutionSource::Fail,
        }
    }

    pub fn coordinate(&self) -> Option<Coordinate> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(Coordinate { lat, lon }),
            _ => None,
        }
    }
}

/// Write-through mapping from lookup key to resolution outcome, backed by a
/// CSV file with columns `address, lat, lon, source`.
///
/// Every `put` rewrites the file through a same-directory temp file and an
/// atomic rename, so an interrupted run loses at most the in-flight entry
/// and the file never accumulates duplicate keys.
pub struct GeoCache {
    path: PathBuf,
    entries: HashMap<String, CacheEntry>,
    order: Vec<String>,
}

impl GeoCache {
    /// Loads the cache from `path`. A missing or unreadable file yields an
    /// empty cache; cache trouble must never fail a run.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let mut cache = Self {
            path: path.as_ref().to_path_buf(),
            entries: HashMap::new(),
            order: Vec::new(),
        };
        match cache.read_file() {
            Ok(loaded) => {
                if loaded > 0 {
                    debug!(loaded, path = %cache.path.display(), "geocode cache loaded");
                }
            }
            Err(err) => {
                warn!(
                    ?err,
                    path = %cache.path.display(),
                    "geocode cache unreadable; starting empty"
                );
                cache.entries.clear();
                cache.order.clear();
            }
        }
        cache
    }

    pub fn lookup(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Upserts the entry and immediately persists the whole mapping.
    pub fn put(&mut self, entry: CacheEntry) -> AppResult<()> {
        self.insert(entry);
        self.persist()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn insert(&mut self, entry: CacheEntry) {
        if !self.entries.contains_key(&entry.address) {
            self.order.push(entry.address.clone());
        }
        self.entries.insert(entry.address.clone(), entry);
    }

    fn read_file(&mut self) -> AppResult<usize> {
        if !self.path.exists() {
            return Ok(0);
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)?;
        let headers = reader.headers()?.clone();
        // Older cache files used `full_address` for the key column.
        let Some(address_idx) =
            find_column(&headers, "address").or_else(|| find_column(&headers, "full_address"))
        else {
            warn!(
                path = %self.path.display(),
                "geocode cache has no address column; starting empty"
            );
            return Ok(0);
        };
        let lat_idx = find_column(&headers, "lat");
        let lon_idx = find_column(&headers, "lon");
        let source_idx = find_column(&headers, "source");

        for record in reader.records() {
            let record = record?;
            let Some(address) = field(&record, Some(address_idx)) else {
                continue;
            };
            let lat = field(&record, lat_idx).and_then(|v| v.parse::<f64>().ok());
            let lon = field(&record, lon_idx).and_then(|v| v.parse::<f64>().ok());
            // A lone coordinate is as useless as none.
            let (lat, lon) = match (lat, lon) {
                (Some(lat), Some(lon)) => (Some(lat), Some(lon)),
                _ => (None, None),
            };
            let stored = field(&record, source_idx).and_then(|v| ResolutionSource::parse(&v));
            let source = match (lat.is_some(), stored) {
                (false, _) => ResolutionSource::Fail,
                (true, Some(ResolutionSource::Fail)) | (true, None) => ResolutionSource::Cache,
                (true, Some(source)) => source,
            };
            self.insert(CacheEntry {
                address,
                lat,
                lon,
                source,
            });
        }
        Ok(self.entries.len())
    }

    fn persist(&self) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            writer.write_record(["address", "lat", "lon", "source"])?;
            for key in &self.order {
                let entry = &self.entries[key];
                let lat = float_field(entry.lat);
                let lon = float_field(entry.lon);
                writer.write_record([
                    entry.address.as_str(),
                    lat.as_str(),
                    lon.as_str(),
                    entry.source.as_str(),
                ])?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn find_column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|header| header.trim() == name)
}

fn field(record: &StringRecord, idx: Option<usize>) -> Option<String> {
    let value = record.get(idx?)?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn float_field(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
