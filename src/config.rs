use std::time::Duration;
use std::{env, io};

use tracing::debug;

const DEFAULT_DATABASE_FILE: &str = "rups.db";
const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";
const DEFAULT_USER_AGENT: &str = concat!("rups-coverage/", env!("CARGO_PKG_VERSION"));
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MIN_DELAY_MS: u64 = 1_200;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_WAIT_MS: u64 = 8_000;
const DEFAULT_RUN_LOG_BATCH_SIZE: usize = 25;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_file_name: String,
    pub only_operational: bool,
    pub run_log_enabled: bool,
    pub run_log_batch_size: usize,
    pub geocoder: GeocoderConfig,
}

/// Settings for the external geocoding collaborator. The delay is a courtesy
/// throttle towards the provider, not a correctness requirement.
#[derive(Clone, Debug)]
pub struct GeocoderConfig {
    pub base_url: String,
    pub user_agent: String,
    pub request_timeout: Duration,
    pub min_delay: Duration,
    pub max_retries: u32,
    pub retry_wait: Duration,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_NOMINATIM_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            min_delay: Duration::from_millis(DEFAULT_MIN_DELAY_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_wait: Duration::from_millis(DEFAULT_RETRY_WAIT_MS),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            database_file_name: env::var("DATABASE_FILE_NAME")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DATABASE_FILE.to_string()),
            only_operational: parse_bool("ONLY_OPERATIONAL", true),
            run_log_enabled: parse_bool("RUN_LOG_ENABLED", true),
            run_log_batch_size: parse_usize("RUN_LOG_BATCH_SIZE", DEFAULT_RUN_LOG_BATCH_SIZE)
                .max(1),
            geocoder: GeocoderConfig {
                base_url: env::var("NOMINATIM_BASE_URL")
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_NOMINATIM_URL.to_string()),
                user_agent: env::var("GEOCODER_USER_AGENT")
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
                request_timeout: Duration::from_secs(parse_u64(
                    "GEOCODER_TIMEOUT_SECS",
                    DEFAULT_REQUEST_TIMEOUT_SECS,
                )),
                min_delay: Duration::from_millis(parse_u64(
                    "GEOCODER_MIN_DELAY_MS",
                    DEFAULT_MIN_DELAY_MS,
                )),
                max_retries: parse_u32("GEOCODER_MAX_RETRIES", DEFAULT_MAX_RETRIES),
                retry_wait: Duration::from_millis(parse_u64(
                    "GEOCODER_RETRY_WAIT_MS",
                    DEFAULT_RETRY_WAIT_MS,
                )),
            },
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}
