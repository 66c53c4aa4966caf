use std::time::Duration;

use crate::error::{AppError, Result};
use crate::types::Pair;

pub const MB_API_URL: &str = "https://api.mercadobitcoin.net/api/v4";

/// Extra calendar days fetched before `from` so the 200-day window is seeded.
pub const SMA_LOOKBACK_DAYS: i64 = 200;

/// Trailing window checked for gaps after each backfill.
pub const COMPLETENESS_WINDOW_DAYS: i64 = 365;

/// Oldest `from` accepted by the query API, in days before today.
pub const MAX_QUERY_AGE_DAYS: i64 = 365;

/// HTTP timeout for a single candle fetch (seconds).
pub const FETCH_TIMEOUT_SECS: u64 = 30;

/// Attempts of the fetch→persist unit per pair per run.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;

/// Backoff between attempts in production (seconds).
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 3600;

/// Backoff between attempts when TEST_MODE is on (milliseconds).
pub const TEST_RETRY_INTERVAL_MS: u64 = 100;

/// Scheduler interval (seconds).
pub const DEFAULT_RUN_INTERVAL_SECS: u64 = 24 * 3600;

/// Maximum missing days listed in an `incomplete_data` alert body.
pub const ALERT_MAX_LISTED_DAYS: usize = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub mb_api_url: String,
    /// Pairs processed by each run, in order (PAIRS, comma-separated)
    pub pairs: Vec<Pair>,
    pub retry_attempts: u32,
    pub retry_interval: Duration,
    pub run_interval: Duration,
    /// Deliver alerts beyond the log (ALERT_ENABLED)
    pub alert_enabled: bool,
    pub alert_webhook_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Unset keys take defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let test_mode = get("TEST_MODE").is_some_and(|v| v == "true");

        let pairs = match get("PAIRS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<Pair>().map_err(|e| AppError::Config(e.to_string())))
                .collect::<Result<Vec<_>>>()?,
            None => Pair::ALL.to_vec(),
        };
        if pairs.is_empty() {
            return Err(AppError::Config("PAIRS must name at least one pair".to_string()));
        }

        let retry_attempts = parse_or(&get, "RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS)?;
        if retry_attempts == 0 {
            return Err(AppError::Config("RETRY_ATTEMPTS must be at least 1".to_string()));
        }

        let retry_interval = match get("RETRY_INTERVAL_SECS") {
            Some(v) => Duration::from_secs(v.parse().map_err(|_| {
                AppError::Config("RETRY_INTERVAL_SECS must be a number of seconds".to_string())
            })?),
            None if test_mode => Duration::from_millis(TEST_RETRY_INTERVAL_MS),
            None => Duration::from_secs(DEFAULT_RETRY_INTERVAL_SECS),
        };

        Ok(Self {
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            db_path: get("DB_PATH").unwrap_or_else(|| "mms.db".to_string()),
            api_port: get("API_PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            mb_api_url: get("MB_API_URL").unwrap_or_else(|| MB_API_URL.to_string()),
            pairs,
            retry_attempts,
            retry_interval,
            run_interval: Duration::from_secs(parse_or(
                &get,
                "RUN_INTERVAL_SECS",
                DEFAULT_RUN_INTERVAL_SECS,
            )?),
            alert_enabled: get("ALERT_ENABLED").is_some_and(|v| v == "true"),
            alert_webhook_url: get("ALERT_WEBHOOK_URL").filter(|s| !s.trim().is_empty()),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match get(key) {
        Some(v) => v
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {v}"))),
        None => Ok(default),
    }
}
