//! Historical backfill: daily observations for the last N days per coin

use sea_orm::DatabaseConnection;
use tracing::info;

use crate::error::PipelineError;
use crate::models::TrackedCoin;
use crate::services::fetcher::{with_retry, PriceProvider, RetryPolicy};
use crate::services::price_writer::{self, DuplicatePolicy, WriteSummary};
use crate::services::reporting;

/// Days fetched for a symbol with little stored history
pub const INITIAL_BACKFILL_DAYS: u32 = 30;

/// Days fetched once the history is established
pub const INCREMENTAL_BACKFILL_DAYS: u32 = 7;

pub fn days_to_fetch(existing_rows: i64) -> u32 {
    if existing_rows < INITIAL_BACKFILL_DAYS as i64 {
        INITIAL_BACKFILL_DAYS
    } else {
        INCREMENTAL_BACKFILL_DAYS
    }
}

/// Fetch and store `days` of history for `coin`; `None` picks the window from what is stored
pub async fn backfill_coin(
    db: &DatabaseConnection,
    provider: &dyn PriceProvider,
    coin: &TrackedCoin,
    days: Option<u32>,
    policy: DuplicatePolicy,
    retry: RetryPolicy,
) -> Result<WriteSummary, PipelineError> {
    let days = match days {
        Some(days) => days,
        None => days_to_fetch(reporting::history_stats(db, &coin.symbol).await?.observations),
    };

    let label = format!("{} history ({} days)", coin.coin_id, days);
    let observations = with_retry(retry, &label, || provider.fetch_daily_history(coin, days)).await?;

    let observations: Vec<_> = observations.into_iter().filter(|o| o.has_any_value()).collect();
    let summary = price_writer::write_observations(db, &observations, policy).await?;

    info!(
        coin = %coin.coin_id,
        days = days,
        fetched = observations.len(),
        inserted = summary.inserted(),
        updated = summary.updated,
        skipped = summary.skipped,
        "Backfill complete"
    );

    Ok(summary)
}
