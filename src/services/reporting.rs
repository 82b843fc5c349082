//! Read-side queries over stored prices and forecast runs

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use sea_orm::{ConnectionTrait, DatabaseBackend, FromQueryResult, Statement};
use serde::Serialize;

use crate::entities::crypto_predictions::PredictionRow;
use crate::error::PipelineError;

#[derive(Debug, Clone, Default, PartialEq, FromQueryResult, Serialize)]
pub struct HistoryStats {
    pub observations: i64,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, FromQueryResult, Serialize)]
pub struct ForecastStats {
    pub total_forecasts: i64,
    pub forecast_runs: i64,
    pub unique_forecast_days: i64,
    pub first_run: Option<NaiveDateTime>,
    pub latest_run: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, FromQueryResult, Serialize)]
pub struct LatestPrice {
    pub symbol: String,
    pub date: NaiveDate,
    pub price_usd: Option<Decimal>,
    pub market_cap: Option<Decimal>,
    pub volume: Option<Decimal>,
}

/// Rows of the most recent forecast run for `symbol`, ordered by `ds`
pub async fn latest_forecast<C: ConnectionTrait>(
    db: &C,
    symbol: &str,
) -> Result<Vec<PredictionRow>, PipelineError> {
    let rows = PredictionRow::find_by_statement(Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        r#"
        SELECT ds, yhat, yhat_lower, yhat_upper, symbol, created_at
        FROM crypto_predictions
        WHERE symbol = $1
          AND created_at = (
              SELECT MAX(created_at) FROM crypto_predictions WHERE symbol = $1
          )
        ORDER BY ds
        "#,
        [symbol.to_uppercase().into()],
    ))
    .all(db)
    .await?;

    Ok(rows)
}

pub async fn history_stats<C: ConnectionTrait>(
    db: &C,
    symbol: &str,
) -> Result<HistoryStats, PipelineError> {
    let stats = HistoryStats::find_by_statement(Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        r#"
        SELECT COUNT(*) AS observations,
               MIN(date) AS first_date,
               MAX(date) AS last_date
        FROM crypto_prices
        WHERE symbol = $1
        "#,
        [symbol.to_uppercase().into()],
    ))
    .one(db)
    .await?;

    Ok(stats.unwrap_or_default())
}

pub async fn forecast_stats<C: ConnectionTrait>(
    db: &C,
    symbol: &str,
) -> Result<ForecastStats, PipelineError> {
    let stats = ForecastStats::find_by_statement(Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        r#"
        SELECT COUNT(*) AS total_forecasts,
               COUNT(DISTINCT created_at) AS forecast_runs,
               COUNT(DISTINCT ds) AS unique_forecast_days,
               MIN(created_at) AS first_run,
               MAX(created_at) AS latest_run
        FROM crypto_predictions
        WHERE symbol = $1
        "#,
        [symbol.to_uppercase().into()],
    ))
    .one(db)
    .await?;

    Ok(stats.unwrap_or_default())
}

/// Most recent row per symbol
pub async fn latest_prices<C: ConnectionTrait>(db: &C) -> Result<Vec<LatestPrice>, PipelineError> {
    // DISTINCT ON picks the first row of each symbol group after ordering
    let rows = LatestPrice::find_by_statement(Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        r#"
        SELECT DISTINCT ON (symbol)
            symbol, date, price_usd, market_cap, volume
        FROM crypto_prices
        ORDER BY symbol, date DESC, id DESC
        "#,
        vec![],
    ))
    .all(db)
    .await?;

    Ok(rows)
}
