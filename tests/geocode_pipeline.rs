use std::sync::Arc;

use httptest::matchers::{all_of, contains, request, url_decoded};
use httptest::responders::json_encoded;
use httptest::{Expectation, Server};
use serde_json::json;
use tempfile::tempdir;

use rups_coverage::{
    attach_coordinates, db, export, heatmap, ingestion, BatchGeocoder, GeoCache, GeocoderConfig,
    NominatimClient, ProviderRecord, ResolutionSource, ServiceLocation, ThrottledResolver,
};

fn fast_geocoder(server: &Server) -> GeocoderConfig {
    GeocoderConfig {
        base_url: server.url_str(""),
        min_delay: std::time::Duration::ZERO,
        retry_wait: std::time::Duration::ZERO,
        ..GeocoderConfig::default()
    }
}

fn search_expectation(
    query: &'static str,
    body: serde_json::Value,
    times: usize,
) -> Expectation {
    Expectation::matching(all_of!(
        request::method("GET"),
        request::path("/search"),
        request::query(url_decoded(contains(("q", query))))
    ))
    .times(times)
    .respond_with(json_encoded(body))
}

fn provider(municipality: &str, department: &str) -> ProviderRecord {
    ProviderRecord {
        nit: Some("900100200".into()),
        name: Some("EMPRESA DE ACUEDUCTO DE TUNJA".into()),
        department: (!department.is_empty()).then(|| department.to_string()),
        municipality: (!municipality.is_empty()).then(|| municipality.to_string()),
        service: Some("ACUEDUCTO".into()),
        status: Some("OPERATIVA".into()),
    }
}

#[tokio::test]
async fn resolves_batch_with_cache_and_failure_containment() {
    let server = Server::run();
    // Tunja resolves once and is afterwards served from the cache; the bare
    // country key finds no match on either run.
    server.expect(search_expectation(
        "Tunja, Boyacá, Colombia",
        json!([{ "lat": "5.54", "lon": "-73.36" }]),
        1,
    ));
    server.expect(search_expectation("Colombia", json!([]), 2));

    let dir = tempdir().unwrap();
    let cache_path = dir.path().join("reports").join(export::CACHE_FILE);
    let providers = vec![
        provider("Tunja", "Boyacá"),
        provider("Tunja", "Boyacá"),
        provider("", ""),
    ];
    let locations: Vec<ServiceLocation> = providers.iter().map(Into::into).collect();

    let geocoder_config = fast_geocoder(&server);
    let client = NominatimClient::new(&geocoder_config).unwrap();
    let resolver = ThrottledResolver::new(Arc::new(client), &geocoder_config);
    let mut geocoder = BatchGeocoder::new(GeoCache::load(&cache_path), resolver);

    let outcome = geocoder.geocode_all(&locations).await.unwrap();

    assert_eq!(outcome.unique.len(), 2);
    assert_eq!(outcome.unique[0].query, "Tunja, Boyacá, Colombia");
    assert_eq!(outcome.unique[0].weight, 2);
    assert_eq!(outcome.unique[0].source, ResolutionSource::Nominatim);
    assert_eq!(outcome.unique[1].query, "Colombia");
    assert_eq!(outcome.unique[1].weight, 1);
    assert_eq!(outcome.unique[1].source, ResolutionSource::Fail);
    assert_eq!(outcome.stats.resolved, 1);
    assert_eq!(outcome.stats.failed, 1);

    let enriched = attach_coordinates(&providers, &outcome);
    assert_eq!(enriched.len(), 3);
    assert_eq!(enriched[0].lat, Some(5.54));
    assert_eq!(enriched[1].lon, Some(-73.36));
    assert_eq!(enriched[2].lat, None);

    // Durable cache holds exactly the two keys, header aside.
    let cache_file = std::fs::read_to_string(&cache_path).unwrap();
    assert_eq!(cache_file.lines().count(), 3);

    // Second run: the resolved key is a cache hit, the failed key is retried.
    let client = NominatimClient::new(&geocoder_config).unwrap();
    let resolver = ThrottledResolver::new(Arc::new(client), &geocoder_config);
    let mut geocoder = BatchGeocoder::new(GeoCache::load(&cache_path), resolver);
    let rerun = geocoder.geocode_all(&locations).await.unwrap();

    assert_eq!(rerun.stats.cache_hits, 1);
    assert_eq!(rerun.stats.lookups, 1);
    assert_eq!(rerun.unique[0].source, ResolutionSource::Cache);
    assert_eq!(rerun.unique[0].lat, Some(5.54));
}

#[tokio::test]
async fn full_pipeline_from_registry_csv_to_reports() {
    let server = Server::run();
    server.expect(search_expectation(
        "Tunja, Boyacá, Colombia",
        json!([{ "lat": "5.5352776", "lon": "-73.3677335" }]),
        1,
    ));

    let dir = tempdir().unwrap();
    let registry_path = dir.path().join("registry.csv");
    std::fs::write(
        &registry_path,
        "\
NIT,NOMBRE,DEPARTAMENTO_PRESTACION,MUNICIPIO_PRESTACION,SERVICIO,ESTADO
900100200,EMPRESA DE ACUEDUCTO DE TUNJA,Boyacá,Tunja,ACUEDUCTO,OPERATIVA
900100201,ASEO CAPITAL,Boyacá,Tunja,AAA,OPERATIVA
900100202,SUSPENDIDA S.A.,Boyacá,Tunja,ASEO,CANCELADO
900100203,SIN UBICACION,,,ASEO,OPERATIVA
",
    )
    .unwrap();

    // Ingest.
    let ctx = db::bootstrap(dir.path().join("database").join("rups.db")).unwrap();
    let mut connection = ctx.connection;
    let parsed = ingestion::parse_registry(&registry_path).unwrap();
    assert_eq!(parsed.skipped, 1);
    let summary = ingestion::persist_rows(&mut connection, &parsed.rows).unwrap();
    assert_eq!(summary.inserted, 3);

    // Geocode operational rows only.
    let providers = db::load_located_providers(&connection, true).unwrap();
    assert_eq!(providers.len(), 2);

    let geocoder_config = fast_geocoder(&server);
    let client = NominatimClient::new(&geocoder_config).unwrap();
    let resolver = ThrottledResolver::new(Arc::new(client), &geocoder_config);
    let reports_dir = dir.path().join("reports");
    let mut geocoder = BatchGeocoder::new(
        GeoCache::load(reports_dir.join(export::CACHE_FILE)),
        resolver,
    );
    let locations: Vec<ServiceLocation> = providers.iter().map(Into::into).collect();
    let outcome = geocoder.geocode_all(&locations).await.unwrap();
    assert_eq!(outcome.stats.total_keys, 1);
    assert_eq!(outcome.stats.resolved, 1);

    // Exports.
    export::write_unique_keys(reports_dir.join(export::UNIQUE_KEYS_FILE), &outcome.unique)
        .unwrap();
    let enriched = attach_coordinates(&providers, &outcome);
    export::write_enriched(reports_dir.join(export::ENRICHED_FILE), &enriched).unwrap();

    let points = heatmap::aggregate(enriched.iter().map(|row| (row.lat, row.lon)));
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].weight, 2);
    let images_dir = dir.path().join("images");
    export::render_heatmap(images_dir.join(export::HEATMAP_FILE), &points).unwrap();

    let unique_csv =
        std::fs::read_to_string(reports_dir.join(export::UNIQUE_KEYS_FILE)).unwrap();
    assert!(unique_csv.contains("Tunja"));
    assert!(unique_csv.contains("nominatim"));
    let html = std::fs::read_to_string(images_dir.join(export::HEATMAP_FILE)).unwrap();
    assert!(html.contains("5.5352776"));

    // The stored registry still has the non-operational row for reports.
    let all = db::load_providers(&connection).unwrap();
    assert_eq!(all.len(), 3);
    let coverage = rups_coverage::kpi::department_coverage(&all);
    assert_eq!(coverage.len(), 1);
    assert_eq!(coverage[0].providers, 3);
    assert_eq!(coverage[0].waste, 2);
}
