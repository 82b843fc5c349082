//! Daily pipeline job
//!
//! Wakes up at least hourly and runs the pipeline whenever the last
//! successful run is older than the configured interval, so a restart
//! neither repeats a finished day nor waits a full interval to catch up.

use std::future::Future;
use std::sync::Arc;

use sea_orm::DatabaseConnection;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::services::fetcher::PriceProvider;
use crate::services::pipeline::{self, RunOptions};
use crate::services::sync_status::{self, jobs};

const MAX_CHECK_INTERVAL_SECS: u64 = 3600;

/// How often the job checks whether a run is due
pub fn check_interval(config: &PipelineConfig) -> Duration {
    config.interval.min(Duration::from_secs(MAX_CHECK_INTERVAL_SECS))
}

/// Start the daily pipeline background job; the task ends on ctrl-c
pub fn start_daily_pipeline_job(
    db: DatabaseConnection,
    provider: Arc<dyn PriceProvider>,
    config: PipelineConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_until_shutdown(&db, provider.as_ref(), &config, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
    })
}

/// Tick and run until `shutdown` resolves. A run still in flight at that
/// point is dropped; its lease expires after the lease timeout.
async fn run_until_shutdown<F>(
    db: &DatabaseConnection,
    provider: &dyn PriceProvider,
    config: &PipelineConfig,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = run_forever(db, provider, config) => {}
        _ = shutdown => {
            tracing::info!("Shutdown requested, stopping daily pipeline job");
        }
    }
}

async fn run_forever(db: &DatabaseConnection, provider: &dyn PriceProvider, config: &PipelineConfig) {
    let mut ticker = interval(check_interval(config));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        run_if_due(db, provider, config).await;
    }
}

async fn run_if_due(db: &DatabaseConnection, provider: &dyn PriceProvider, config: &PipelineConfig) {
    match sync_status::should_sync(db, jobs::DAILY_PIPELINE, config.interval_secs_i32()).await {
        Ok(true) => {}
        Ok(false) => return,
        Err(e) => {
            tracing::warn!("Failed to check sync status: {}", e);
            return;
        }
    }

    tracing::info!("Starting scheduled pipeline run");
    match pipeline::run_pipeline(db, provider, config, RunOptions::today()).await {
        Ok(report) => {
            tracing::info!(
                "Scheduled run complete: {} observations, {} forecast rows",
                report.observations.len(),
                report.forecast_rows
            );
        }
        Err(PipelineError::RunInProgress(job)) => {
            tracing::info!("[{}] Another run holds the lease, skipping", job);
        }
        Err(e) => {
            // Already recorded in sync_status; the next due check retries
            tracing::error!("Scheduled pipeline run failed: {}", e);
        }
    }
}
