//! Pipeline: Idle → Fetching → Writing → Forecasting → Done
//!
//! A run holds the job lease for its whole duration. Any error aborts the
//! run; observations are only written once every coin has been fetched and
//! forecasts are only written once every symbol has been fitted.

use chrono::{NaiveDate, SubsecRound, Utc};
use sea_orm::DatabaseConnection;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::models::PriceObservation;
use crate::services::export;
use crate::services::fetcher::{self, PriceProvider};
use crate::services::forecaster::{self, ForecastRun};
use crate::services::price_writer::{self, WriteSummary};
use crate::services::sync_status::{self, jobs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Idle,
    Fetching,
    Writing,
    Forecasting,
    Done,
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Date the observations pertain to
    pub date: NaiveDate,
    pub skip_forecast: bool,
}

impl RunOptions {
    pub fn today() -> Self {
        Self {
            date: Utc::now().date_naive(),
            skip_forecast: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub date: NaiveDate,
    pub stage: RunStage,
    pub observations: Vec<PriceObservation>,
    pub write: WriteSummary,
    pub forecasts: Vec<ForecastRun>,
    pub forecast_rows: u64,
    pub pruned: u64,
}

struct StageTracker {
    stage: RunStage,
}

impl StageTracker {
    fn advance(&mut self, next: RunStage) {
        info!(from = ?self.stage, to = ?next, "Pipeline stage");
        self.stage = next;
    }
}

/// Run the pipeline once under the run lease and record the outcome in the checkpoint
pub async fn run_pipeline(
    db: &DatabaseConnection,
    provider: &dyn PriceProvider,
    config: &PipelineConfig,
    options: RunOptions,
) -> Result<RunReport, PipelineError> {
    let job = jobs::DAILY_PIPELINE;
    let interval_secs = config.interval_secs_i32();
    let now = Utc::now().naive_utc();

    if !sync_status::try_acquire_lease(db, job, interval_secs, config.lease_timeout, now).await? {
        return Err(PipelineError::RunInProgress(job.to_string()));
    }

    let result = execute_run(db, provider, config, options).await;

    match &result {
        Ok(report) => {
            info!(
                date = %report.date,
                observations = report.observations.len(),
                inserted = report.write.inserted(),
                forecasts = report.forecasts.len(),
                forecast_rows = report.forecast_rows,
                "Pipeline run complete"
            );
            if let Err(e) = sync_status::record_success(db, job, interval_secs).await {
                warn!(error = %e, "Failed to record successful run");
            }
        }
        Err(e) => {
            error!(date = %options.date, error = %e, "Pipeline run failed");
            if let Err(record_err) = sync_status::record_failure(db, job, &e.to_string(), interval_secs).await {
                warn!(error = %record_err, "Failed to record failed run");
            }
        }
    }

    if let Err(e) = sync_status::release_lease(db, job).await {
        error!(error = %e, "Failed to release pipeline lease");
    }

    result
}

async fn execute_run(
    db: &DatabaseConnection,
    provider: &dyn PriceProvider,
    config: &PipelineConfig,
    options: RunOptions,
) -> Result<RunReport, PipelineError> {
    let mut tracker = StageTracker { stage: RunStage::Idle };

    tracker.advance(RunStage::Fetching);
    let observations = fetcher::fetch_all(
        provider,
        &config.coins,
        options.date,
        config.retry,
        config.rate_limit,
    )
    .await?;

    if let Some(dir) = &config.export_dir {
        if let Err(e) = export::save_observations(dir, &observations) {
            warn!(dir = %dir.display(), error = %e, "Failed to export observations");
        }
    }

    tracker.advance(RunStage::Writing);
    let write = price_writer::write_observations(db, &observations, config.duplicate_policy).await?;

    let mut forecasts = Vec::new();
    let mut forecast_rows = 0;
    let mut pruned = 0;

    if !options.skip_forecast && !config.forecast_symbols.is_empty() {
        tracker.advance(RunStage::Forecasting);

        // Microsecond precision matches the TIMESTAMP column, so the run can be found by equality
        let created_at = Utc::now().naive_utc().trunc_subsecs(6);

        for symbol in &config.forecast_symbols {
            let history = forecaster::load_history(db, symbol).await?;
            let run = forecaster::build_forecast(symbol, &history, &config.forecast, created_at)?;
            forecasts.push(run);
        }

        forecast_rows = forecaster::save_forecasts(db, &forecasts).await?;

        if let Some(keep_days) = config.prediction_retention_days {
            for symbol in &config.forecast_symbols {
                pruned += forecaster::prune_forecasts(db, symbol, keep_days, created_at).await?;
            }
        }

        if let Some(dir) = &config.export_dir {
            for run in &forecasts {
                if let Err(e) = export::save_forecast(dir, run) {
                    warn!(symbol = %run.symbol, error = %e, "Failed to export forecast");
                }
            }
        }
    }

    tracker.advance(RunStage::Done);

    Ok(RunReport {
        date: options.date,
        stage: tracker.stage,
        observations,
        write,
        forecasts,
        forecast_rows,
        pruned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::crypto_prices;
    use crate::services::fetcher::testing::ScriptedProvider;
    use crate::services::fetcher::RetryPolicy;
    use chrono::Duration;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn exec(rows_affected: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::from_lookup(|key| match key {
            "DATABASE_URL" => Some("postgres://localhost/test".to_string()),
            "COINS" => Some("bitcoin:BTC".to_string()),
            _ => None,
        })
        .unwrap();
        config.retry = RetryPolicy {
            max_attempts: 2,
            base_delay: std::time::Duration::from_millis(1),
        };
        config.rate_limit = std::time::Duration::ZERO;
        config
    }

    fn btc_observation() -> PriceObservation {
        PriceObservation {
            date: date(),
            symbol: "BTC".to_string(),
            price_usd: Some(dec!(42000.50)),
            market_cap: Some(dec!(823000000000)),
            volume: Some(dec!(25000000000)),
        }
    }

    fn history(days: i64) -> Vec<crypto_prices::Model> {
        (0..days)
            .map(|i| crypto_prices::Model {
                id: i as i32 + 1,
                date: date() - Duration::days(days - 1 - i),
                symbol: "BTC".to_string(),
                price_usd: Some(Decimal::from(41000 + 10 * i)),
                market_cap: None,
                volume: None,
                created_at: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_full_run_fetches_writes_and_forecasts() {
        let stored = crypto_prices::Model {
            id: 501,
            date: date(),
            symbol: "BTC".to_string(),
            price_usd: Some(dec!(42000.50)),
            market_cap: Some(dec!(823000000000)),
            volume: Some(dec!(25000000000)),
            created_at: None,
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            // lease row, lease claim, forecast insert, checkpoint, lease release
            .append_exec_results([exec(1), exec(1), exec(30), exec(1), exec(1)])
            .append_query_results([vec![stored]])
            .append_query_results([history(90)])
            .into_connection();
        let provider = ScriptedProvider::with("bitcoin", vec![Ok(btc_observation())]);

        let options = RunOptions {
            date: date(),
            skip_forecast: false,
        };
        let report = run_pipeline(&db, &provider, &config(), options).await.unwrap();

        assert_eq!(report.stage, RunStage::Done);
        assert_eq!(report.observations, vec![btc_observation()]);
        assert_eq!(report.write.inserted_ids, vec![501]);
        assert_eq!(report.forecasts.len(), 1);
        assert_eq!(report.forecast_rows, 30);

        let run = &report.forecasts[0];
        assert_eq!(run.points.len(), 30);
        assert_eq!(run.points[0].ds, date() + Duration::days(1));
        assert!(run.points.iter().all(|p| p.yhat_lower <= p.yhat && p.yhat <= p.yhat_upper));
    }

    #[tokio::test]
    async fn test_held_lease_aborts_before_fetching() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec(0), exec(0)])
            .into_connection();
        let provider = ScriptedProvider::with("bitcoin", vec![Ok(btc_observation())]);

        let err = run_pipeline(&db, &provider, &config(), RunOptions::today())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::RunInProgress(_)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_writes_nothing() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            // lease row, lease claim, failure record, lease release
            .append_exec_results([exec(1), exec(1), exec(1), exec(1)])
            .into_connection();
        let provider = ScriptedProvider::with(
            "bitcoin",
            vec![Err(PipelineError::provider("503 Service Unavailable", true))],
        );

        let err = run_pipeline(
            &db,
            &provider,
            &config(),
            RunOptions {
                date: date(),
                skip_forecast: false,
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::ProviderError { .. }));
        assert_eq!(provider.call_count(), 2);

        let log = format!("{:?}", db.into_transaction_log());
        assert!(!log.contains("crypto_prices"));
        assert!(log.contains("error_count"));
    }

    #[tokio::test]
    async fn test_skip_forecast_stops_after_writing() {
        let stored = crypto_prices::Model {
            id: 9,
            date: date(),
            symbol: "BTC".to_string(),
            price_usd: Some(dec!(42000.50)),
            market_cap: None,
            volume: None,
            created_at: None,
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec(1), exec(1), exec(1), exec(1)])
            .append_query_results([vec![stored]])
            .into_connection();
        let provider = ScriptedProvider::with("bitcoin", vec![Ok(btc_observation())]);

        let report = run_pipeline(
            &db,
            &provider,
            &config(),
            RunOptions {
                date: date(),
                skip_forecast: true,
            },
        )
        .await
        .unwrap();

        assert!(report.forecasts.is_empty());
        assert_eq!(report.write.inserted(), 1);
    }

    #[test]
    fn test_stage_tracker_advances() {
        let mut tracker = StageTracker { stage: RunStage::Idle };
        tracker.advance(RunStage::Fetching);
        assert_eq!(tracker.stage, RunStage::Fetching);
    }
}
