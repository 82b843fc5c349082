//! Environment-driven configuration for the pipeline binaries

use chrono::Duration as ChronoDuration;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::PipelineError;
use crate::models::TrackedCoin;
use crate::services::coingecko::DEFAULT_BASE_URL;
use crate::services::fetcher::{RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY_MS};
use crate::services::forecast_model::ModelSpec;
use crate::services::forecaster::{ForecastSettings, DEFAULT_MIN_HISTORY};
use crate::services::price_writer::DuplicatePolicy;

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_COINGECKO_API_KEY: &str = "COINGECKO_API_KEY";
pub const ENV_COINGECKO_BASE_URL: &str = "COINGECKO_BASE_URL";
pub const ENV_COINS: &str = "COINS";
pub const ENV_FORECAST_SYMBOLS: &str = "FORECAST_SYMBOLS";
pub const ENV_DUPLICATE_POLICY: &str = "DUPLICATE_POLICY";
pub const ENV_FORECAST_MIN_HISTORY: &str = "FORECAST_MIN_HISTORY";
pub const ENV_FORECAST_INTERVAL_WIDTH: &str = "FORECAST_INTERVAL_WIDTH";
pub const ENV_PIPELINE_INTERVAL: &str = "PIPELINE_INTERVAL_SECS";
pub const ENV_LEASE_TIMEOUT: &str = "PIPELINE_LEASE_TIMEOUT_SECS";
pub const ENV_FETCH_MAX_ATTEMPTS: &str = "FETCH_MAX_ATTEMPTS";
pub const ENV_FETCH_RETRY_BASE_MS: &str = "FETCH_RETRY_BASE_MS";
pub const ENV_FETCH_RATE_LIMIT_MS: &str = "FETCH_RATE_LIMIT_MS";
pub const ENV_PREDICTION_RETENTION_DAYS: &str = "PREDICTION_RETENTION_DAYS";
pub const ENV_EXPORT_DIR: &str = "EXPORT_DIR";

const DEFAULT_COINS: &str = "bitcoin:BTC,ethereum:ETH,binancecoin:BNB,cardano:ADA";
const DEFAULT_FORECAST_SYMBOLS: &str = "BTC";
const DEFAULT_PIPELINE_INTERVAL_SECS: u64 = 86400;
const DEFAULT_LEASE_TIMEOUT_SECS: i64 = 3600;
const DEFAULT_RATE_LIMIT_MS: u64 = 120;

pub const MAX_RETENTION_DAYS: i64 = 36_500;
const MAX_LEASE_TIMEOUT_SECS: i64 = 7 * 86_400;

/// `crypto_prices.symbol` is VARCHAR(10)
const MAX_SYMBOL_LEN: usize = 10;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: String,
    pub coingecko_api_key: Option<String>,
    pub coingecko_base_url: String,
    pub coins: Vec<TrackedCoin>,
    pub forecast_symbols: Vec<String>,
    pub duplicate_policy: DuplicatePolicy,
    pub forecast: ForecastSettings,
    pub retry: RetryPolicy,
    pub rate_limit: Duration,
    pub interval: Duration,
    pub lease_timeout: ChronoDuration,
    pub prediction_retention_days: Option<i64>,
    pub export_dir: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_url = get(ENV_DATABASE_URL)
            .ok_or_else(|| PipelineError::Config(format!("{} must be set", ENV_DATABASE_URL)))?;

        let coins = parse_coins(&get(ENV_COINS).unwrap_or_else(|| DEFAULT_COINS.to_string()))?;
        let forecast_symbols = parse_symbols(
            &get(ENV_FORECAST_SYMBOLS).unwrap_or_else(|| DEFAULT_FORECAST_SYMBOLS.to_string()),
        )?;

        let duplicate_policy = match get(ENV_DUPLICATE_POLICY) {
            Some(value) => value.parse()?,
            None => DuplicatePolicy::default(),
        };

        let interval_width: f64 = parse_or(&get, ENV_FORECAST_INTERVAL_WIDTH, 0.80)?;
        if !(interval_width > 0.0 && interval_width < 1.0) {
            return Err(PipelineError::Config(format!(
                "{} must be between 0 and 1, got {}",
                ENV_FORECAST_INTERVAL_WIDTH, interval_width
            )));
        }

        let forecast = ForecastSettings {
            min_history: parse_or(&get, ENV_FORECAST_MIN_HISTORY, DEFAULT_MIN_HISTORY)?,
            model: ModelSpec {
                interval_width,
                ..ModelSpec::default()
            },
        };

        let retry = RetryPolicy {
            max_attempts: parse_or(&get, ENV_FETCH_MAX_ATTEMPTS, DEFAULT_MAX_ATTEMPTS)?,
            base_delay: Duration::from_millis(parse_or(
                &get,
                ENV_FETCH_RETRY_BASE_MS,
                DEFAULT_RETRY_BASE_DELAY_MS,
            )?),
        };

        let interval_secs: u64 = parse_or(&get, ENV_PIPELINE_INTERVAL, DEFAULT_PIPELINE_INTERVAL_SECS)?;
        if interval_secs == 0 {
            return Err(PipelineError::Config(format!("{} must be positive", ENV_PIPELINE_INTERVAL)));
        }

        let prediction_retention_days = match get(ENV_PREDICTION_RETENTION_DAYS) {
            Some(value) => {
                let days = parse_value::<i64>(ENV_PREDICTION_RETENTION_DAYS, &value)?;
                if !(0..=MAX_RETENTION_DAYS).contains(&days) {
                    return Err(PipelineError::Config(format!(
                        "{} must be between 0 and {}, got {}",
                        ENV_PREDICTION_RETENTION_DAYS, MAX_RETENTION_DAYS, days
                    )));
                }
                Some(days)
            }
            None => None,
        };

        let lease_timeout_secs: i64 = parse_or(&get, ENV_LEASE_TIMEOUT, DEFAULT_LEASE_TIMEOUT_SECS)?;
        let lease_timeout = (1..=MAX_LEASE_TIMEOUT_SECS)
            .contains(&lease_timeout_secs)
            .then(|| ChronoDuration::try_seconds(lease_timeout_secs))
            .flatten()
            .ok_or_else(|| {
                PipelineError::Config(format!(
                    "{} must be between 1 and {}, got {}",
                    ENV_LEASE_TIMEOUT, MAX_LEASE_TIMEOUT_SECS, lease_timeout_secs
                ))
            })?;

        Ok(Self {
            database_url,
            coingecko_api_key: get(ENV_COINGECKO_API_KEY),
            coingecko_base_url: get(ENV_COINGECKO_BASE_URL)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            coins,
            forecast_symbols,
            duplicate_policy,
            forecast,
            retry,
            rate_limit: Duration::from_millis(parse_or(&get, ENV_FETCH_RATE_LIMIT_MS, DEFAULT_RATE_LIMIT_MS)?),
            interval: Duration::from_secs(interval_secs),
            lease_timeout,
            prediction_retention_days,
            export_dir: get(ENV_EXPORT_DIR).map(PathBuf::from),
        })
    }

    /// Interval in the form stored in `sync_status.min_interval_secs`
    pub fn interval_secs_i32(&self) -> i32 {
        i32::try_from(self.interval.as_secs()).unwrap_or(i32::MAX)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, PipelineError> {
    value
        .parse()
        .map_err(|_| PipelineError::Config(format!("invalid value for {}: '{}'", key, value)))
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, PipelineError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => parse_value(key, &value),
        None => Ok(default),
    }
}

fn validate_symbol(symbol: &str) -> Result<String, PipelineError> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() || symbol.len() > MAX_SYMBOL_LEN {
        return Err(PipelineError::Config(format!(
            "symbol '{}' must be 1-{} characters",
            symbol, MAX_SYMBOL_LEN
        )));
    }
    Ok(symbol)
}

/// Parse `coin_id:SYMBOL` pairs separated by commas
pub fn parse_coins(value: &str) -> Result<Vec<TrackedCoin>, PipelineError> {
    let mut coins = Vec::new();

    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (coin_id, symbol) = entry.split_once(':').ok_or_else(|| {
            PipelineError::Config(format!("coin entry '{}' must look like coin_id:SYMBOL", entry))
        })?;
        let coin_id = coin_id.trim();
        if coin_id.is_empty() {
            return Err(PipelineError::Config(format!("coin entry '{}' has no id", entry)));
        }
        coins.push(TrackedCoin::new(coin_id, validate_symbol(symbol)?));
    }

    if coins.is_empty() {
        return Err(PipelineError::Config("no coins configured".to_string()));
    }

    Ok(coins)
}

pub fn parse_symbols(value: &str) -> Result<Vec<String>, PipelineError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(validate_symbol)
        .collect()
}
