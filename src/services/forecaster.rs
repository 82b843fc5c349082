//! Forecaster: fits the price model on a symbol's stored history and
//! appends a 30-day forecast run to `crypto_predictions`

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, Query},
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    TransactionTrait,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::entities::{crypto_predictions::CryptoPredictions, crypto_prices, prelude::*};
use crate::error::PipelineError;
use crate::models::ForecastPoint;
use crate::services::forecast_model::{FittedModel, ModelSpec};

/// Every forecast run covers exactly this many future days
pub const FORECAST_HORIZON_DAYS: usize = 30;

/// Fewer distinct dates than this fails with `InsufficientHistory`
pub const DEFAULT_MIN_HISTORY: usize = 10;

/// Decimal places kept for stored forecast values
const STORED_SCALE: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastSettings {
    pub min_history: usize,
    pub model: ModelSpec,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            min_history: DEFAULT_MIN_HISTORY,
            model: ModelSpec::default(),
        }
    }
}

/// One forecast run: all points share `created_at`
#[derive(Debug, Clone)]
pub struct ForecastRun {
    pub symbol: String,
    pub created_at: NaiveDateTime,
    pub history_points: usize,
    pub history_start: NaiveDate,
    pub history_end: NaiveDate,
    pub points: Vec<ForecastPoint>,
}

/// Usable history from raw rows: rows without a price are dropped and
/// repeated dates collapse to the most recently inserted row
pub fn prepare_history(rows: Vec<crypto_prices::Model>) -> Vec<(NaiveDate, Decimal)> {
    let mut by_date: BTreeMap<NaiveDate, (i32, Decimal)> = BTreeMap::new();

    for row in rows {
        let Some(price) = row.price_usd else {
            continue;
        };
        match by_date.get(&row.date) {
            Some((id, _)) if *id > row.id => {}
            _ => {
                by_date.insert(row.date, (row.id, price));
            }
        }
    }

    by_date
        .into_iter()
        .map(|(date, (_, price))| (date, price))
        .collect()
}

/// All stored rows for `symbol`, ordered by date then insertion
pub async fn load_history<C: ConnectionTrait>(
    db: &C,
    symbol: &str,
) -> Result<Vec<(NaiveDate, Decimal)>, PipelineError> {
    let rows = CryptoPrices::find()
        .filter(crypto_prices::Column::Symbol.eq(symbol))
        .order_by_asc(crypto_prices::Column::Date)
        .order_by_asc(crypto_prices::Column::Id)
        .all(db)
        .await?;

    debug!(symbol = %symbol, rows = rows.len(), "Loaded price history");

    Ok(prepare_history(rows))
}

fn to_stored(value: f64) -> Result<Decimal, PipelineError> {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(STORED_SCALE))
        .ok_or_else(|| PipelineError::ModelFitError(format!("forecast value {} out of range", value)))
}

/// Fit the model and produce the forecast points without touching the database
pub fn build_forecast(
    symbol: &str,
    history: &[(NaiveDate, Decimal)],
    settings: &ForecastSettings,
    created_at: NaiveDateTime,
) -> Result<ForecastRun, PipelineError> {
    let required = settings.min_history.max(2);
    if history.len() < required {
        return Err(PipelineError::InsufficientHistory {
            symbol: symbol.to_string(),
            found: history.len(),
            required,
        });
    }

    let series: Vec<(NaiveDate, f64)> = history
        .iter()
        .map(|(date, price)| {
            price.to_f64().map(|p| (*date, p)).ok_or_else(|| {
                PipelineError::ModelFitError(format!("price {} not representable", price))
            })
        })
        .collect::<Result<_, _>>()?;

    let model = FittedModel::fit(&series, &settings.model)?;
    let predictions = model.forecast(FORECAST_HORIZON_DAYS)?;

    let points = predictions
        .iter()
        .map(|p| {
            Ok(ForecastPoint {
                ds: p.ds,
                yhat: to_stored(p.yhat)?,
                yhat_lower: to_stored(p.lower)?,
                yhat_upper: to_stored(p.upper)?,
                symbol: symbol.to_string(),
            })
        })
        .collect::<Result<Vec<_>, PipelineError>>()?;

    Ok(ForecastRun {
        symbol: symbol.to_string(),
        created_at,
        history_points: series.len(),
        history_start: series[0].0,
        history_end: model.last_date(),
        points,
    })
}

async fn insert_run<C: ConnectionTrait>(db: &C, run: &ForecastRun) -> Result<u64, PipelineError> {
    if run.points.is_empty() {
        return Ok(0);
    }

    let mut insert = Query::insert();
    insert.into_table(CryptoPredictions::Table).columns([
        CryptoPredictions::Ds,
        CryptoPredictions::Yhat,
        CryptoPredictions::YhatLower,
        CryptoPredictions::YhatUpper,
        CryptoPredictions::Symbol,
        CryptoPredictions::CreatedAt,
    ]);

    for point in &run.points {
        insert
            .values([
                point.ds.into(),
                point.yhat.into(),
                point.yhat_lower.into(),
                point.yhat_upper.into(),
                point.symbol.clone().into(),
                run.created_at.into(),
            ])
            .map_err(|e| PipelineError::PersistenceError(e.to_string()))?;
    }

    let statement = db.get_database_backend().build(&insert);
    let result = db.execute(statement).await?;

    Ok(result.rows_affected())
}

/// Insert every run in a single transaction
pub async fn save_forecasts(
    db: &DatabaseConnection,
    runs: &[ForecastRun],
) -> Result<u64, PipelineError> {
    let txn = db.begin().await?;
    let mut written = 0;

    for run in runs {
        written += insert_run(&txn, run).await?;
    }

    txn.commit().await?;
    Ok(written)
}

/// Read history, fit, and store one forecast run for `symbol`
pub async fn forecast_symbol(
    db: &DatabaseConnection,
    symbol: &str,
    settings: &ForecastSettings,
    created_at: NaiveDateTime,
) -> Result<ForecastRun, PipelineError> {
    let symbol = symbol.to_uppercase();
    let history = load_history(db, &symbol).await?;
    let run = build_forecast(&symbol, &history, settings, created_at)?;

    let written = save_forecasts(db, std::slice::from_ref(&run)).await?;

    info!(
        symbol = %run.symbol,
        history_points = run.history_points,
        history_start = %run.history_start,
        history_end = %run.history_end,
        written = written,
        "Forecast run stored"
    );

    Ok(run)
}

/// Oldest `created_at` kept when pruning; never later than `now`
pub fn retention_cutoff(now: NaiveDateTime, keep_days: i64) -> Result<NaiveDateTime, PipelineError> {
    if keep_days < 0 {
        return Err(PipelineError::Config(format!(
            "retention must not be negative, got {} days",
            keep_days
        )));
    }

    Duration::try_days(keep_days)
        .and_then(|keep| now.checked_sub_signed(keep))
        .ok_or_else(|| {
            PipelineError::Config(format!("retention of {} days is out of range", keep_days))
        })
}

/// Delete forecast runs created more than `keep_days` before `now`
pub async fn prune_forecasts(
    db: &DatabaseConnection,
    symbol: &str,
    keep_days: i64,
    now: NaiveDateTime,
) -> Result<u64, PipelineError> {
    let cutoff = retention_cutoff(now, keep_days)?;
    let symbol = symbol.to_uppercase();

    let delete = Query::delete()
        .from_table(CryptoPredictions::Table)
        .and_where(Expr::col(CryptoPredictions::Symbol).eq(symbol.as_str()))
        .and_where(Expr::col(CryptoPredictions::CreatedAt).lt(cutoff))
        .to_owned();

    let result = db.execute(db.get_database_backend().build(&delete)).await?;
    let deleted = result.rows_affected();

    if deleted > 0 {
        info!(symbol = %symbol, deleted = deleted, cutoff = %cutoff, "Pruned old forecast runs");
    }

    Ok(deleted)
}
