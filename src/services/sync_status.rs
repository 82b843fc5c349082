//! Sync status service: persisted checkpoint and run lease per job
//!
//! `last_success_at` lets a restarted process skip a run that already
//! succeeded within the job's interval. `running_since` is a lease that
//! keeps two overlapping runs from racing; a lease older than the timeout
//! is considered abandoned and can be taken over.

use chrono::{Duration, NaiveDateTime, Utc};
use sea_orm::{
    sea_query::{Expr, OnConflict, Query},
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    StatementBuilder,
};

use crate::entities::sync_status::{self, Entity as SyncStatus};
use crate::error::PipelineError;

/// Job names for tracking sync status
pub mod jobs {
    pub const DAILY_PIPELINE: &str = "crypto_daily_pipeline";
    pub const HISTORICAL_BACKFILL: &str = "crypto_historical_backfill";
}

/// Default minimum intervals between syncs (in seconds)
pub mod intervals {
    pub const DAILY_PIPELINE: i32 = 86400; // 24 hours
    pub const HISTORICAL_BACKFILL: i32 = 86400;
}

/// Check if a sync job should run based on last successful sync time
///
/// Returns true if:
/// - No record exists for this job (first run)
/// - Last successful sync was more than min_interval_secs ago
///
/// The caller's interval wins over the stored one, so a changed
/// configuration takes effect on the next check.
pub async fn should_sync(
    db: &DatabaseConnection,
    job_name: &str,
    min_interval_secs: i32,
) -> Result<bool, PipelineError> {
    let status = SyncStatus::find()
        .filter(sync_status::Column::JobName.eq(job_name))
        .one(db)
        .await?;

    match status {
        None => {
            tracing::info!("[{}] First run detected, will sync", job_name);
            Ok(true)
        }
        Some(record) => match record.last_success_at {
            None => {
                tracing::info!("[{}] No previous successful sync, will sync", job_name);
                Ok(true)
            }
            Some(last_success) => {
                let now = Utc::now().naive_utc();
                let elapsed = now.signed_duration_since(last_success);
                let interval = Duration::seconds(min_interval_secs as i64);

                if elapsed >= interval {
                    tracing::info!(
                        "[{}] Last sync was {}s ago (min: {}s), will sync",
                        job_name,
                        elapsed.num_seconds(),
                        min_interval_secs
                    );
                    Ok(true)
                } else {
                    tracing::info!(
                        "[{}] Skipping sync - last sync was {}s ago, next sync in {}s",
                        job_name,
                        elapsed.num_seconds(),
                        (interval - elapsed).num_seconds()
                    );
                    Ok(false)
                }
            }
        },
    }
}

async fn execute<C: ConnectionTrait, S: StatementBuilder>(
    db: &C,
    statement: &S,
) -> Result<u64, PipelineError> {
    let result = db.execute(db.get_database_backend().build(statement)).await?;
    Ok(result.rows_affected())
}

/// Create the job's row if it does not exist yet
async fn ensure_row<C: ConnectionTrait>(
    db: &C,
    job_name: &str,
    default_interval_secs: i32,
) -> Result<(), PipelineError> {
    let mut insert = Query::insert();
    insert
        .into_table(SyncStatus)
        .columns([
            sync_status::Column::JobName,
            sync_status::Column::SuccessCount,
            sync_status::Column::ErrorCount,
            sync_status::Column::MinIntervalSecs,
        ])
        .values([
            job_name.into(),
            0i64.into(),
            0i64.into(),
            default_interval_secs.into(),
        ])
        .map_err(|e| PipelineError::PersistenceError(e.to_string()))?
        .on_conflict(
            OnConflict::column(sync_status::Column::JobName)
                .do_nothing()
                .to_owned(),
        );

    execute(db, &insert).await?;
    Ok(())
}

/// Try to take the run lease for `job_name`.
///
/// Returns false when another run holds a lease younger than `timeout`.
pub async fn try_acquire_lease<C: ConnectionTrait>(
    db: &C,
    job_name: &str,
    default_interval_secs: i32,
    timeout: Duration,
    now: NaiveDateTime,
) -> Result<bool, PipelineError> {
    ensure_row(db, job_name, default_interval_secs).await?;

    let result = SyncStatus::update_many()
        .col_expr(sync_status::Column::RunningSince, Expr::value(Some(now)))
        .filter(sync_status::Column::JobName.eq(job_name))
        .filter(
            Condition::any()
                .add(sync_status::Column::RunningSince.is_null())
                .add(sync_status::Column::RunningSince.lt(now - timeout)),
        )
        .exec(db)
        .await?;

    let acquired = result.rows_affected == 1;
    if acquired {
        tracing::debug!("[{}] Lease acquired", job_name);
    } else {
        tracing::warn!("[{}] Lease held by another run", job_name);
    }

    Ok(acquired)
}

pub async fn release_lease<C: ConnectionTrait>(db: &C, job_name: &str) -> Result<(), PipelineError> {
    SyncStatus::update_many()
        .col_expr(
            sync_status::Column::RunningSince,
            Expr::value(Option::<NaiveDateTime>::None),
        )
        .filter(sync_status::Column::JobName.eq(job_name))
        .exec(db)
        .await?;

    tracing::debug!("[{}] Lease released", job_name);
    Ok(())
}

/// Record a successful sync
pub async fn record_success<C: ConnectionTrait>(
    db: &C,
    job_name: &str,
    default_interval_secs: i32,
) -> Result<(), PipelineError> {
    let now = Utc::now().naive_utc();

    let mut insert = Query::insert();
    insert
        .into_table(SyncStatus)
        .columns([
            sync_status::Column::JobName,
            sync_status::Column::LastSuccessAt,
            sync_status::Column::LastAttemptAt,
            sync_status::Column::LastError,
            sync_status::Column::SuccessCount,
            sync_status::Column::ErrorCount,
            sync_status::Column::MinIntervalSecs,
        ])
        .values([
            job_name.into(),
            now.into(),
            now.into(),
            Option::<String>::None.into(),
            1i64.into(),
            0i64.into(),
            default_interval_secs.into(),
        ])
        .map_err(|e| PipelineError::PersistenceError(e.to_string()))?
        .on_conflict(
            OnConflict::column(sync_status::Column::JobName)
                .update_columns([
                    sync_status::Column::LastSuccessAt,
                    sync_status::Column::LastAttemptAt,
                    sync_status::Column::LastError,
                    sync_status::Column::MinIntervalSecs,
                ])
                .value(
                    sync_status::Column::SuccessCount,
                    Expr::col((SyncStatus, sync_status::Column::SuccessCount)).add(1),
                )
                .to_owned(),
        );

    execute(db, &insert).await?;

    tracing::debug!("[{}] Recorded successful sync", job_name);
    Ok(())
}

/// Record a failed sync attempt
pub async fn record_failure<C: ConnectionTrait>(
    db: &C,
    job_name: &str,
    error: &str,
    default_interval_secs: i32,
) -> Result<(), PipelineError> {
    let now = Utc::now().naive_utc();

    let mut insert = Query::insert();
    insert
        .into_table(SyncStatus)
        .columns([
            sync_status::Column::JobName,
            sync_status::Column::LastAttemptAt,
            sync_status::Column::LastError,
            sync_status::Column::SuccessCount,
            sync_status::Column::ErrorCount,
            sync_status::Column::MinIntervalSecs,
        ])
        .values([
            job_name.into(),
            now.into(),
            error.into(),
            0i64.into(),
            1i64.into(),
            default_interval_secs.into(),
        ])
        .map_err(|e| PipelineError::PersistenceError(e.to_string()))?
        .on_conflict(
            OnConflict::column(sync_status::Column::JobName)
                .update_columns([
                    sync_status::Column::LastAttemptAt,
                    sync_status::Column::LastError,
                    sync_status::Column::MinIntervalSecs,
                ])
                .value(
                    sync_status::Column::ErrorCount,
                    Expr::col((SyncStatus, sync_status::Column::ErrorCount)).add(1),
                )
                .to_owned(),
        );

    execute(db, &insert).await?;

    tracing::debug!("[{}] Recorded failed sync: {}", job_name, error);
    Ok(())
}
