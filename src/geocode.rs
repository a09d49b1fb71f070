use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, Instant};
use tracing::{trace, warn};

use crate::config::GeocoderConfig;
use crate::errors::AppResult;

/// A resolved WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

/// The single external lookup capability.
///
/// `Ok(None)` means the provider had no match for the query; `Err` means the
/// call itself failed and may be retried.
#[async_trait]
pub trait GeocodeLookup: Send + Sync {
    async fn lookup(&self, query: &str) -> AppResult<Option<Coordinate>>;
}

/// Free-text search against a Nominatim instance.
pub struct NominatimClient {
    http: reqwest::Client,
    base_url: String,
}

impl NominatimClient {
    pub fn new(config: &GeocoderConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Deserialize)]
struct SearchResult {
    lat: String,
    lon: String,
}

#[async_trait]
impl GeocodeLookup for NominatimClient {
    async fn lookup(&self, query: &str) -> AppResult<Option<Coordinate>> {
        let response = self
            .http
            .get(format!("{}/search", self.base_url))
            .query(&[("q", query), ("format", "jsonv2"), ("limit", "1")])
            .send()
            .await?
            .error_for_status()?;

        let results: Vec<SearchResult> = response.json().await?;
        let Some(first) = results.into_iter().next() else {
            return Ok(None);
        };

        // Nominatim serializes coordinates as strings.
        match (first.lat.parse::<f64>(), first.lon.parse::<f64>()) {
            (Ok(lat), Ok(lon)) => Ok(Some(Coordinate { lat, lon })),
            _ => {
                warn!(query, "nominatim returned unparseable coordinates");
                Ok(None)
            }
        }
    }
}

/// Enforces a minimum elapsed time between the start of successive calls.
struct RateLimiter {
    min_interval: Duration,
    last_tick: AsyncMutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_tick: AsyncMutex::new(None),
        }
    }

    async fn wait(&self) {
        let mut guard = self.last_tick.lock().await;
        if let Some(prev) = *guard {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *guard = Some(Instant::now());
    }
}

/// Wraps a [`GeocodeLookup`] with the courtesy throttle and bounded retries.
///
/// A query that keeps failing is downgraded to "not found" rather than
/// surfaced as an error: one bad address must not abort a batch.
pub struct ThrottledResolver {
    lookup: Arc<dyn GeocodeLookup>,
    limiter: RateLimiter,
    max_retries: u32,
    retry_wait: Duration,
}

impl ThrottledResolver {
    pub fn new(lookup: Arc<dyn GeocodeLookup>, config: &GeocoderConfig) -> Self {
        Self {
            lookup,
            limiter: RateLimiter::new(config.min_delay),
            max_retries: config.max_retries,
            retry_wait: config.retry_wait,
        }
    }

    pub async fn resolve(&self, query: &str) -> Option<Coordinate> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.limiter.wait().await;
            match self.lookup.lookup(query).await {
                Ok(found) => {
                    trace!(query, attempt, found = found.is_some(), "geocode lookup finished");
                    return found;
                }
                Err(err) if attempt <= self.max_retries => {
                    warn!(
                        ?err,
                        query, attempt, "geocode lookup failed; retrying after {:?}", self.retry_wait
                    );
                    sleep(self.retry_wait).await;
                }
                Err(err) => {
                    warn!(?err, query, attempt, "geocode lookup failed; giving up");
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use httptest::matchers::{all_of, contains, request, url_decoded};
    use httptest::responders::json_encoded;
    use httptest::{Expectation, Server};
    use parking_lot::Mutex;
    use serde_json::json;

    use crate::errors::AppError;

    use super::*;

    struct ScriptedLookup {
        calls: AtomicUsize,
        responses: Mutex<Vec<AppResult<Option<Coordinate>>>>,
    }

    impl ScriptedLookup {
        fn new(responses: Vec<AppResult<Option<Coordinate>>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                responses: Mutex::new(responses),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GeocodeLookup for ScriptedLookup {
        async fn lookup(&self, _query: &str) -> AppResult<Option<Coordinate>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .pop()
                .unwrap_or(Err(AppError::Config("script exhausted".into())))
        }
    }

    fn fast_config() -> GeocoderConfig {
        GeocoderConfig {
            min_delay: Duration::ZERO,
            retry_wait: Duration::ZERO,
            ..GeocoderConfig::default()
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        // Responses pop from the back: two failures, then a match.
        let lookup = Arc::new(ScriptedLookup::new(vec![
            Ok(Some(Coordinate { lat: 5.54, lon: -73.36 })),
            Err(AppError::Config("transient".into())),
            Err(AppError::Config("transient".into())),
        ]));
        let resolver = ThrottledResolver::new(lookup.clone(), &fast_config());

        let found = resolver.resolve("Tunja, Boyacá, Colombia").await;

        assert_eq!(found, Some(Coordinate { lat: 5.54, lon: -73.36 }));
        assert_eq!(lookup.calls(), 3);
    }

    #[tokio::test]
    async fn downgrades_exhausted_retries_to_not_found() {
        let lookup = Arc::new(ScriptedLookup::new(vec![]));
        let resolver = ThrottledResolver::new(lookup.clone(), &fast_config());

        let found = resolver.resolve("Nowhere, Colombia").await;

        assert_eq!(found, None);
        assert_eq!(lookup.calls(), fast_config().max_retries as usize + 1);
    }

    #[tokio::test]
    async fn passes_provider_no_match_through() {
        let lookup = Arc::new(ScriptedLookup::new(vec![Ok(None)]));
        let resolver = ThrottledResolver::new(lookup.clone(), &fast_config());

        assert_eq!(resolver.resolve("Colombia").await, None);
        assert_eq!(lookup.calls(), 1);
    }

    #[tokio::test]
    async fn parses_nominatim_search_response() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of!(
                request::method("GET"),
                request::path("/search"),
                request::query(url_decoded(contains(("q", "Tunja, Boyacá, Colombia"))))
            ))
            .respond_with(json_encoded(json!([
                { "lat": "5.5352776", "lon": "-73.3677335", "display_name": "Tunja, Boyacá, Colombia" }
            ]))),
        );

        let config = GeocoderConfig {
            base_url: server.url_str(""),
            ..GeocoderConfig::default()
        };
        let client = NominatimClient::new(&config).unwrap();

        let found = client.lookup("Tunja, Boyacá, Colombia").await.unwrap();
        assert_eq!(
            found,
            Some(Coordinate { lat: 5.5352776, lon: -73.3677335 })
        );
    }

    #[tokio::test]
    async fn treats_empty_result_set_as_no_match() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of!(request::method("GET"), request::path("/search")))
                .respond_with(json_encoded(json!([]))),
        );

        let config = GeocoderConfig {
            base_url: server.url_str(""),
            ..GeocoderConfig::default()
        };
        let client = NominatimClient::new(&config).unwrap();

        assert_eq!(client.lookup("Atlantis, Colombia").await.unwrap(), None);
    }
}
