use std::fs;
use std::path::Path;

use tracing::info;

use crate::batch::{EnrichedProvider, UniqueKeyRecord};
use crate::errors::AppResult;
use crate::heatmap::WeightedPoint;
use crate::kpi::DepartmentCoverage;

pub const CACHE_FILE: &str = "geo_cache_municipios.csv";
pub const UNIQUE_KEYS_FILE: &str = "geo_municipios_unique.csv";
pub const ENRICHED_FILE: &str = "geo_prestacion_all.csv";
pub const COVERAGE_FILE: &str = "department_coverage.csv";
pub const HEATMAP_FILE: &str = "heatmap_prestacion_municipios.html";

pub fn write_unique_keys<P: AsRef<Path>>(path: P, records: &[UniqueKeyRecord]) -> AppResult<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "department",
        "municipality",
        "weight",
        "query",
        "lat",
        "lon",
        "source",
    ])?;
    for record in records {
        let weight = record.weight.to_string();
        let lat = float_field(record.lat);
        let lon = float_field(record.lon);
        writer.write_record([
            record.department.as_str(),
            record.municipality.as_str(),
            weight.as_str(),
            record.query.as_str(),
            lat.as_str(),
            lon.as_str(),
            record.source.as_str(),
        ])?;
    }
    writer.flush()?;
    info!(rows = records.len(), path = %path.display(), "unique-key table exported");
    Ok(())
}

pub fn write_enriched<P: AsRef<Path>>(path: P, rows: &[EnrichedProvider]) -> AppResult<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "nit",
        "name",
        "department",
        "municipality",
        "service",
        "status",
        "lat",
        "lon",
    ])?;
    for row in rows {
        let provider = &row.provider;
        let lat = float_field(row.lat);
        let lon = float_field(row.lon);
        writer.write_record([
            provider.nit.as_deref().unwrap_or_default(),
            provider.name.as_deref().unwrap_or_default(),
            provider.department.as_deref().unwrap_or_default(),
            provider.municipality.as_deref().unwrap_or_default(),
            provider.service.as_deref().unwrap_or_default(),
            provider.status.as_deref().unwrap_or_default(),
            lat.as_str(),
            lon.as_str(),
        ])?;
    }
    writer.flush()?;
    info!(rows = rows.len(), path = %path.display(), "enriched record table exported");
    Ok(())
}

pub fn write_department_coverage<P: AsRef<Path>>(
    path: P,
    coverage: &[DepartmentCoverage],
) -> AppResult<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["department", "providers", "aqueduct", "sewerage", "waste"])?;
    for row in coverage {
        let providers = row.providers.to_string();
        let aqueduct = row.aqueduct.to_string();
        let sewerage = row.sewerage.to_string();
        let waste = row.waste.to_string();
        writer.write_record([
            row.department.as_str(),
            providers.as_str(),
            aqueduct.as_str(),
            sewerage.as_str(),
            waste.as_str(),
        ])?;
    }
    writer.flush()?;
    info!(rows = coverage.len(), path = %path.display(), "department coverage exported");
    Ok(())
}

/// Renders the weighted points as a self-contained Leaflet heatmap page,
/// centered on Colombia.
pub fn render_heatmap<P: AsRef<Path>>(path: P, points: &[WeightedPoint]) -> AppResult<()> {
    let path = path.as_ref();
    ensure_parent(path)?;

    let mut payload = String::from("[");
    for (index, point) in points.iter().enumerate() {
        if index > 0 {
            payload.push(',');
        }
        payload.push_str(&format!("[{},{},{}]", point.lat, point.lon, point.weight));
    }
    payload.push(']');

    fs::write(path, HEATMAP_TEMPLATE.replace("__POINTS__", &payload))?;
    info!(points = points.len(), path = %path.display(), "heatmap rendered");
    Ok(())
}

fn ensure_parent(path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn float_field(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

const HEATMAP_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8"/>
<title>Service coverage heatmap</title>
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css"/>
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<script src="https://unpkg.com/leaflet.heat@0.2.0/dist/leaflet-heat.js"></script>
<style>html, body, #map { height: 100%; margin: 0; }</style>
</head>
<body>
<div id="map"></div>
<script>
var map = L.map('map').setView([4.5709, -74.2973], 5);
L.tileLayer('https://{s}.basemaps.cartocdn.com/light_all/{z}/{x}/{y}{r}.png', {
    attribution: '&copy; OpenStreetMap contributors &copy; CARTO',
    maxZoom: 19
}).addTo(map);
L.heatLayer(__POINTS__, { radius: 14, blur: 22, maxZoom: 12 }).addTo(map);
</script>
</body>
</html>
"#;
