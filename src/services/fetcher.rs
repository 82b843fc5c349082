//! Fetcher: one observation per tracked coin, with bounded retry
//!
//! The provider is behind [`PriceProvider`] so the pipeline can run
//! against CoinGecko in production and a canned provider in tests.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::models::{PriceObservation, TrackedCoin};

/// Default number of attempts per provider call
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay between retries (ms)
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Exactly one observation for `coin` on `date`, or `DataUnavailable`
    async fn fetch_observation(
        &self,
        coin: &TrackedCoin,
        date: NaiveDate,
    ) -> Result<PriceObservation, PipelineError>;

    /// One observation per day for the last `days` days
    async fn fetch_daily_history(
        &self,
        coin: &TrackedCoin,
        days: u32,
    ) -> Result<Vec<PriceObservation>, PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (1-based): base, 2x base, 4x base, ...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay * factor
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or
/// `policy.max_attempts` is reached
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempts < max_attempts => {
                let delay = policy.delay_after(attempts);
                warn!(
                    target_call = %label,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Provider call failed, retrying..."
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Fetch one observation with retry
pub async fn fetch_observation(
    provider: &dyn PriceProvider,
    coin: &TrackedCoin,
    date: NaiveDate,
    policy: RetryPolicy,
) -> Result<PriceObservation, PipelineError> {
    let label = format!("{}@{}", coin.coin_id, date);
    let observation =
        with_retry(policy, &label, || provider.fetch_observation(coin, date)).await?;

    if !observation.has_any_value() {
        return Err(PipelineError::DataUnavailable {
            coin_id: coin.coin_id.clone(),
            date: date.to_string(),
        });
    }

    Ok(observation)
}

/// Fetch every tracked coin for `date`; the first failure aborts the batch
pub async fn fetch_all(
    provider: &dyn PriceProvider,
    coins: &[TrackedCoin],
    date: NaiveDate,
    policy: RetryPolicy,
    rate_limit: Duration,
) -> Result<Vec<PriceObservation>, PipelineError> {
    let mut observations = Vec::with_capacity(coins.len());

    for (index, coin) in coins.iter().enumerate() {
        if index > 0 && !rate_limit.is_zero() {
            tokio::time::sleep(rate_limit).await;
        }

        let observation = fetch_observation(provider, coin, date, policy).await?;
        info!(
            coin = %coin.coin_id,
            symbol = %observation.symbol,
            price_usd = ?observation.price_usd,
            "Fetched observation"
        );
        observations.push(observation);
    }

    Ok(observations)
}
