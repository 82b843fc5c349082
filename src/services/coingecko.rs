use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use moka::future::Cache;
use reqwest::{Client, RequestBuilder, StatusCode};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::error::PipelineError;
use crate::models::{PriceObservation, TrackedCoin};
use crate::services::fetcher::PriceProvider;

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct CoinGeckoService {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    // Past dates never change, so their snapshots can be cached
    snapshot_cache: Arc<Cache<String, PriceObservation>>,
    chart_cache: Arc<Cache<String, Vec<PriceObservation>>>,
}

#[derive(Debug, Deserialize)]
struct MarketChartResponse {
    prices: Vec<[f64; 2]>,
    #[serde(default)]
    market_caps: Vec<[f64; 2]>,
    #[serde(default)]
    total_volumes: Vec<[f64; 2]>,
}

/// Shared shape of `/coins/{id}` and `/coins/{id}/history`
#[derive(Debug, Deserialize)]
struct CoinSnapshotResponse {
    #[serde(default)]
    market_data: Option<MarketData>,
}

#[derive(Debug, Default, Deserialize)]
struct MarketData {
    #[serde(default)]
    current_price: HashMap<String, Option<f64>>,
    #[serde(default)]
    market_cap: HashMap<String, Option<f64>>,
    #[serde(default)]
    total_volume: HashMap<String, Option<f64>>,
}

impl CoinGeckoService {
    pub fn new(api_key: Option<String>, base_url: String) -> Self {
        let snapshot_cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(3600)) // 1 hour TTL
            .build();
        let chart_cache = Cache::builder()
            .max_capacity(100)
            .time_to_live(Duration::from_secs(3600))
            .build();

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: base_url.trim_end_matches('/').to_string(),
            snapshot_cache: Arc::new(snapshot_cache),
            chart_cache: Arc::new(chart_cache),
        }
    }

    /// Attach the API key header matching the plan behind `base_url`
    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("accept", "application/json");
        match &self.api_key {
            Some(key) if self.base_url.contains("pro-api") => request.header("x-cg-pro-api-key", key),
            Some(key) => request.header("x-cg-demo-api-key", key),
            None => request,
        }
    }

    /// Price, market cap and volume of `coin` on `date`.
    ///
    /// Today's values come from `/coins/{id}`, past dates from
    /// `/coins/{id}/history`.
    pub async fn get_coin_snapshot(
        &self,
        coin: &TrackedCoin,
        date: NaiveDate,
    ) -> Result<PriceObservation, PipelineError> {
        let today = Utc::now().date_naive();
        if date > today {
            return Err(unavailable(coin, date));
        }

        let cache_key = format!("{}_{}", coin.coin_id, date);
        if date < today {
            if let Some(cached) = self.snapshot_cache.get(&cache_key).await {
                tracing::debug!("Cache hit for {}", cache_key);
                return Ok(cached);
            }
        }

        tracing::info!("Fetching {} snapshot for {} from CoinGecko", coin.coin_id, date);

        let request = if date == today {
            let url = format!("{}/coins/{}", self.base_url, coin.coin_id);
            self.client.get(&url).query(&[
                ("localization", "false"),
                ("tickers", "false"),
                ("community_data", "false"),
                ("developer_data", "false"),
            ])
        } else {
            let url = format!("{}/coins/{}/history", self.base_url, coin.coin_id);
            self.client.get(&url).query(&[
                ("date", date.format("%d-%m-%Y").to_string()),
                ("localization", "false".to_string()),
            ])
        };

        let response = self.authorized(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &error_text, coin, date));
        }

        let body = response.text().await?;
        let snapshot: CoinSnapshotResponse = serde_json::from_str(&body).map_err(|e| {
            PipelineError::provider(format!("Malformed snapshot for {}: {}", coin.coin_id, e), false)
        })?;

        let observation = observation_from_snapshot(snapshot, coin, date)?;

        if date < today {
            self.snapshot_cache.insert(cache_key, observation.clone()).await;
        }

        Ok(observation)
    }

    /// Daily samples for the last `days` days, one observation per date
    pub async fn get_market_chart(
        &self,
        coin: &TrackedCoin,
        days: u32,
    ) -> Result<Vec<PriceObservation>, PipelineError> {
        let cache_key = format!("{}_usd_{}", coin.coin_id, days);

        if let Some(cached_data) = self.chart_cache.get(&cache_key).await {
            tracing::debug!("Cache hit for {}", cache_key);
            return Ok(cached_data);
        }

        tracing::info!("Fetching {} days of market chart for {} from CoinGecko", days, coin.coin_id);

        let url = format!("{}/coins/{}/market_chart", self.base_url, coin.coin_id);

        let response = self
            .authorized(self.client.get(&url))
            .query(&[
                ("vs_currency", "usd"),
                ("days", &days.to_string()),
                ("interval", "daily"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &error_text, coin, Utc::now().date_naive()));
        }

        let body = response.text().await?;
        let chart: MarketChartResponse = serde_json::from_str(&body).map_err(|e| {
            PipelineError::provider(format!("Malformed market chart for {}: {}", coin.coin_id, e), false)
        })?;

        let observations = observations_from_chart(&chart, coin)?;

        if let Some(last) = observations.last() {
            tracing::debug!(
                "Fetched {} daily prices for {}, last: {:?} @ {}",
                observations.len(),
                coin.coin_id,
                last.price_usd,
                last.date
            );
        }

        self.chart_cache.insert(cache_key, observations.clone()).await;

        Ok(observations)
    }
}

#[async_trait]
impl PriceProvider for CoinGeckoService {
    async fn fetch_observation(
        &self,
        coin: &TrackedCoin,
        date: NaiveDate,
    ) -> Result<PriceObservation, PipelineError> {
        self.get_coin_snapshot(coin, date).await
    }

    async fn fetch_daily_history(
        &self,
        coin: &TrackedCoin,
        days: u32,
    ) -> Result<Vec<PriceObservation>, PipelineError> {
        self.get_market_chart(coin, days).await
    }
}

fn unavailable(coin: &TrackedCoin, date: NaiveDate) -> PipelineError {
    PipelineError::DataUnavailable {
        coin_id: coin.coin_id.clone(),
        date: date.to_string(),
    }
}

/// Map a non-success HTTP status to the error taxonomy
fn classify_status(
    status: StatusCode,
    body: &str,
    coin: &TrackedCoin,
    date: NaiveDate,
) -> PipelineError {
    if status == StatusCode::NOT_FOUND {
        return unavailable(coin, date);
    }

    let transient = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
    PipelineError::provider(format!("CoinGecko API error {}: {}", status, body), transient)
}

/// Provider values must be finite and non-negative; anything else is dropped
fn usd_value(map: &HashMap<String, Option<f64>>) -> Option<Decimal> {
    let value = (*map.get("usd")?)?;
    to_decimal(value)
}

fn to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() || value < 0.0 {
        tracing::warn!("Discarding invalid provider value {}", value);
        return None;
    }
    Decimal::from_f64(value)
}

fn observation_from_snapshot(
    snapshot: CoinSnapshotResponse,
    coin: &TrackedCoin,
    date: NaiveDate,
) -> Result<PriceObservation, PipelineError> {
    let market = snapshot
        .market_data
        .ok_or_else(|| unavailable(coin, date))?;

    let observation = PriceObservation {
        date,
        symbol: coin.symbol.clone(),
        price_usd: usd_value(&market.current_price),
        market_cap: usd_value(&market.market_cap),
        volume: usd_value(&market.total_volume),
    };

    if !observation.has_any_value() {
        return Err(unavailable(coin, date));
    }

    Ok(observation)
}

/// Collapse chart samples to one observation per calendar date (last sample wins)
fn observations_from_chart(
    chart: &MarketChartResponse,
    coin: &TrackedCoin,
) -> Result<Vec<PriceObservation>, PipelineError> {
    let mut by_date: BTreeMap<NaiveDate, PriceObservation> = BTreeMap::new();

    for (i, [timestamp_ms, price]) in chart.prices.iter().enumerate() {
        let date = DateTime::from_timestamp_millis(*timestamp_ms as i64)
            .ok_or_else(|| {
                PipelineError::provider(format!("Invalid timestamp {}", timestamp_ms), false)
            })?
            .date_naive();

        let observation = PriceObservation {
            date,
            symbol: coin.symbol.clone(),
            price_usd: to_decimal(*price),
            market_cap: chart.market_caps.get(i).and_then(|m| to_decimal(m[1])),
            volume: chart.total_volumes.get(i).and_then(|v| to_decimal(v[1])),
        };

        if observation.has_any_value() {
            by_date.insert(date, observation);
        }
    }

    Ok(by_date.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc() -> TrackedCoin {
        TrackedCoin::new("bitcoin", "btc")
    }

    fn jan_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn test_snapshot_parsing() {
        let body = r#"{
            "id": "bitcoin",
            "symbol": "btc",
            "market_data": {
                "current_price": {"usd": 42000.5, "eur": 38000.0},
                "market_cap": {"usd": 823000000000.0},
                "total_volume": {"usd": 25000000000.0}
            }
        }"#;
        let snapshot: CoinSnapshotResponse = serde_json::from_str(body).unwrap();

        let obs = observation_from_snapshot(snapshot, &btc(), jan_first()).unwrap();

        assert_eq!(obs.symbol, "BTC");
        assert_eq!(obs.date, jan_first());
        assert_eq!(obs.price_usd, Some(dec!(42000.5)));
        assert_eq!(obs.market_cap, Some(dec!(823000000000)));
        assert_eq!(obs.volume, Some(dec!(25000000000)));
    }

    #[test]
    fn test_snapshot_without_market_data_is_unavailable() {
        let snapshot: CoinSnapshotResponse =
            serde_json::from_str(r#"{"id": "bitcoin", "symbol": "btc"}"#).unwrap();

        let err = observation_from_snapshot(snapshot, &btc(), jan_first()).unwrap_err();
        assert!(matches!(err, PipelineError::DataUnavailable { .. }));
    }

    #[test]
    fn test_negative_and_null_values_are_dropped() {
        let body = r#"{
            "market_data": {
                "current_price": {"usd": 100.0},
                "market_cap": {"usd": -5.0},
                "total_volume": {"usd": null}
            }
        }"#;
        let snapshot: CoinSnapshotResponse = serde_json::from_str(body).unwrap();

        let obs = observation_from_snapshot(snapshot, &btc(), jan_first()).unwrap();
        assert_eq!(obs.price_usd, Some(dec!(100)));
        assert_eq!(obs.market_cap, None);
        assert_eq!(obs.volume, None);
    }

    #[test]
    fn test_provider_decimals_keep_their_printed_value() {
        assert_eq!(to_decimal(0.35), Some(dec!(0.35)));
        assert_eq!(to_decimal(0.1), Some(dec!(0.1)));

        let body = r#"{
            "market_data": {
                "current_price": {"usd": 0.35},
                "market_cap": {"usd": 12345678.91},
                "total_volume": {"usd": 0.07}
            }
        }"#;
        let snapshot: CoinSnapshotResponse = serde_json::from_str(body).unwrap();

        let obs = observation_from_snapshot(snapshot, &TrackedCoin::new("cardano", "ada"), jan_first())
            .unwrap();
        assert_eq!(obs.price_usd, Some(dec!(0.35)));
        assert_eq!(obs.market_cap, Some(dec!(12345678.91)));
        assert_eq!(obs.volume, Some(dec!(0.07)));
    }

    #[test]
    fn test_chart_keeps_last_sample_per_date() {
        // 2024-01-01 00:00, 2024-01-02 00:00, 2024-01-02 13:20 UTC
        let chart = MarketChartResponse {
            prices: vec![
                [1704067200000.0, 42000.0],
                [1704153600000.0, 43000.0],
                [1704201600000.0, 43500.0],
            ],
            market_caps: vec![[1704067200000.0, 1.0], [1704153600000.0, 2.0], [1704201600000.0, 3.0]],
            total_volumes: vec![],
        };

        let observations = observations_from_chart(&chart, &btc()).unwrap();

        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].date, jan_first());
        assert_eq!(observations[1].price_usd, Some(dec!(43500)));
        assert_eq!(observations[1].market_cap, Some(dec!(3)));
        assert_eq!(observations[1].volume, None);
    }

    #[test]
    fn test_status_classification() {
        let err = classify_status(StatusCode::NOT_FOUND, "", &btc(), jan_first());
        assert!(matches!(err, PipelineError::DataUnavailable { .. }));

        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "", &btc(), jan_first()).is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "", &btc(), jan_first()).is_transient());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "", &btc(), jan_first()).is_transient());
    }

    #[tokio::test]
    async fn test_future_date_is_unavailable_without_request() {
        let service = CoinGeckoService::new(None, "http://127.0.0.1:9".to_string());
        let tomorrow = Utc::now().date_naive() + chrono::Duration::days(1);

        let err = service.get_coin_snapshot(&btc(), tomorrow).await.unwrap_err();
        assert!(matches!(err, PipelineError::DataUnavailable { .. }));
    }
}
