mod common;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, SubsecRound, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crypto_forecast::config::PipelineConfig;
use crypto_forecast::error::PipelineError;
use crypto_forecast::models::{PriceObservation, TrackedCoin};
use crypto_forecast::services::fetcher::PriceProvider;
use crypto_forecast::services::forecaster::{self, ForecastSettings, FORECAST_HORIZON_DAYS};
use crypto_forecast::services::pipeline::{run_pipeline, RunOptions};
use crypto_forecast::services::price_writer::{write_observations, DuplicatePolicy};
use crypto_forecast::services::reporting;

use crate::common::{cleanup_symbol, count_prices, setup_test_db, unique_symbol};

/// Returns the same observation for every date, relabelled for the requested coin
struct FixedProvider {
    template: PriceObservation,
}

#[async_trait]
impl PriceProvider for FixedProvider {
    async fn fetch_observation(
        &self,
        coin: &TrackedCoin,
        date: NaiveDate,
    ) -> Result<PriceObservation, PipelineError> {
        Ok(PriceObservation {
            date,
            symbol: coin.symbol.clone(),
            ..self.template.clone()
        })
    }

    async fn fetch_daily_history(
        &self,
        coin: &TrackedCoin,
        days: u32,
    ) -> Result<Vec<PriceObservation>, PipelineError> {
        let today = Utc::now().date_naive();
        let mut observations = Vec::new();
        for offset in (0..days as i64).rev() {
            observations.push(self.fetch_observation(coin, today - Duration::days(offset)).await?);
        }
        Ok(observations)
    }
}

fn observation(symbol: &str, date: NaiveDate, price: Decimal) -> PriceObservation {
    PriceObservation {
        date,
        symbol: symbol.to_string(),
        price_usd: Some(price),
        market_cap: Some(price * dec!(19500000)),
        volume: Some(dec!(25000000000)),
    }
}

fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset)
}

#[tokio::test]
async fn test_writer_policies_against_postgres() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let symbol = unique_symbol("WR");
    let batch: Vec<_> = (0..3)
        .map(|i| observation(&symbol, day(i), Decimal::from(100 + i)))
        .collect();

    let first = write_observations(&db, &batch, DuplicatePolicy::Accumulate).await.unwrap();
    assert_eq!(first.inserted(), 3);
    assert_eq!(count_prices(&db, &symbol).await.unwrap(), 3);

    // Accumulate keeps every row, so the same batch doubles the count
    write_observations(&db, &batch, DuplicatePolicy::Accumulate).await.unwrap();
    assert_eq!(count_prices(&db, &symbol).await.unwrap(), 6);

    let skipped = write_observations(&db, &batch, DuplicatePolicy::Skip).await.unwrap();
    assert_eq!(skipped.inserted(), 0);
    assert_eq!(skipped.skipped, 3);

    let mut changed = batch.clone();
    changed[0].price_usd = Some(dec!(999));
    let overwritten = write_observations(&db, &changed[..1], DuplicatePolicy::Overwrite)
        .await
        .unwrap();
    assert_eq!(overwritten.updated, 2);
    assert_eq!(count_prices(&db, &symbol).await.unwrap(), 6);

    cleanup_symbol(&db, &symbol).await.unwrap();
}

#[tokio::test]
async fn test_forecast_run_is_stored_and_readable() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let symbol = unique_symbol("FC");
    let history: Vec<_> = (0..60)
        .map(|i| observation(&symbol, day(i), Decimal::from(40000 + 25 * i)))
        .collect();
    write_observations(&db, &history, DuplicatePolicy::Accumulate).await.unwrap();

    let created_at = Utc::now().naive_utc().trunc_subsecs(6);
    let run = forecaster::forecast_symbol(&db, &symbol, &ForecastSettings::default(), created_at)
        .await
        .unwrap();
    assert_eq!(run.points.len(), FORECAST_HORIZON_DAYS);

    let rows = reporting::latest_forecast(&db, &symbol).await.unwrap();
    assert_eq!(rows.len(), FORECAST_HORIZON_DAYS);
    assert_eq!(rows[0].ds, day(60));
    assert_eq!(rows[29].ds, day(89));
    for row in &rows {
        assert_eq!(row.created_at, Some(created_at));
        assert!(row.yhat_lower <= row.yhat && row.yhat <= row.yhat_upper);
    }

    let stats = reporting::forecast_stats(&db, &symbol).await.unwrap();
    assert_eq!(stats.total_forecasts, 30);
    assert_eq!(stats.forecast_runs, 1);

    cleanup_symbol(&db, &symbol).await.unwrap();
}

#[tokio::test]
async fn test_prune_removes_old_runs_and_keeps_current() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let symbol = unique_symbol("PR");
    let history: Vec<_> = (0..45)
        .map(|i| observation(&symbol, day(i), Decimal::from(30000 + 40 * i)))
        .collect();
    write_observations(&db, &history, DuplicatePolicy::Accumulate).await.unwrap();

    let now = Utc::now().naive_utc().trunc_subsecs(6);
    let settings = ForecastSettings::default();
    forecaster::forecast_symbol(&db, &symbol, &settings, now - Duration::days(40))
        .await
        .unwrap();
    forecaster::forecast_symbol(&db, &symbol, &settings, now).await.unwrap();
    assert_eq!(reporting::forecast_stats(&db, &symbol).await.unwrap().forecast_runs, 2);

    let deleted = forecaster::prune_forecasts(&db, &symbol, 30, now).await.unwrap();
    assert_eq!(deleted, FORECAST_HORIZON_DAYS as u64);

    let stats = reporting::forecast_stats(&db, &symbol).await.unwrap();
    assert_eq!(stats.forecast_runs, 1);
    assert_eq!(stats.latest_run, Some(now));

    // Zero days still keeps the run created at `now`
    assert_eq!(forecaster::prune_forecasts(&db, &symbol, 0, now).await.unwrap(), 0);
    let rows = reporting::latest_forecast(&db, &symbol).await.unwrap();
    assert_eq!(rows.len(), FORECAST_HORIZON_DAYS);
    assert!(rows.iter().all(|row| row.created_at == Some(now)));

    cleanup_symbol(&db, &symbol).await.unwrap();
}

#[tokio::test]
async fn test_forecast_without_history_writes_nothing() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let symbol = unique_symbol("NO");

    let err = forecaster::forecast_symbol(
        &db,
        &symbol,
        &ForecastSettings::default(),
        Utc::now().naive_utc(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PipelineError::InsufficientHistory { found: 0, .. }));
    assert!(reporting::latest_forecast(&db, &symbol).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pipeline_run_stores_observation() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let symbol = unique_symbol("PL");
    let coins = format!("bitcoin:{}", symbol);
    let config = PipelineConfig::from_lookup(|key| match key {
        "DATABASE_URL" => Some("unused".to_string()),
        "COINS" => Some(coins.clone()),
        "FORECAST_SYMBOLS" => Some(symbol.clone()),
        "FETCH_RATE_LIMIT_MS" => Some("0".to_string()),
        _ => None,
    })
    .unwrap();
    let provider = FixedProvider {
        template: PriceObservation {
            date: day(0),
            symbol: String::new(),
            price_usd: Some(dec!(42000.50)),
            market_cap: Some(dec!(823000000000)),
            volume: Some(dec!(25000000000)),
        },
    };

    // A single observation is too little history to forecast
    let err = run_pipeline(
        &db,
        &provider,
        &config,
        RunOptions {
            date: day(0),
            skip_forecast: false,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, PipelineError::InsufficientHistory { .. }));
    assert_eq!(count_prices(&db, &symbol).await.unwrap(), 1);

    let report = run_pipeline(
        &db,
        &provider,
        &config,
        RunOptions {
            date: day(1),
            skip_forecast: true,
        },
    )
    .await
    .unwrap();
    assert_eq!(report.write.inserted(), 1);

    let stats = reporting::history_stats(&db, &symbol).await.unwrap();
    assert_eq!(stats.observations, 2);
    assert_eq!(stats.first_date, Some(day(0)));
    assert_eq!(stats.last_date, Some(day(1)));

    cleanup_symbol(&db, &symbol).await.unwrap();
}
