//! Writer: appends observations to `crypto_prices` in one transaction

use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    TransactionTrait,
};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::entities::{crypto_prices, prelude::*};
use crate::error::PipelineError;
use crate::models::PriceObservation;

/// What to do when a (date, symbol) pair is already stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Blind insert; repeated pairs become additional history rows
    #[default]
    Accumulate,
    /// Leave the stored rows alone and drop the new observation
    Skip,
    /// Update the value columns of the stored rows in place
    Overwrite,
}

impl FromStr for DuplicatePolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "accumulate" | "append" => Ok(DuplicatePolicy::Accumulate),
            "skip" => Ok(DuplicatePolicy::Skip),
            "overwrite" | "upsert" => Ok(DuplicatePolicy::Overwrite),
            other => Err(PipelineError::Config(format!(
                "unknown duplicate policy '{}' (expected accumulate, skip or overwrite)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub inserted_ids: Vec<i32>,
    pub updated: u64,
    pub skipped: usize,
}

impl WriteSummary {
    pub fn inserted(&self) -> usize {
        self.inserted_ids.len()
    }
}

/// Write a batch of observations.
///
/// The whole batch runs in a single transaction: on any error nothing is
/// committed and the error surfaces as `PersistenceError`.
pub async fn write_observations(
    db: &DatabaseConnection,
    observations: &[PriceObservation],
    policy: DuplicatePolicy,
) -> Result<WriteSummary, PipelineError> {
    if observations.is_empty() {
        warn!("No observations to write");
        return Ok(WriteSummary::default());
    }

    let txn = db.begin().await?;
    let mut summary = WriteSummary::default();

    for observation in observations {
        match policy {
            DuplicatePolicy::Accumulate => {}
            DuplicatePolicy::Skip => {
                let existing = CryptoPrices::find()
                    .filter(crypto_prices::Column::Symbol.eq(observation.symbol.as_str()))
                    .filter(crypto_prices::Column::Date.eq(observation.date))
                    .one(&txn)
                    .await?;

                if existing.is_some() {
                    debug!(
                        symbol = %observation.symbol,
                        date = %observation.date,
                        "Observation already stored, skipping"
                    );
                    summary.skipped += 1;
                    continue;
                }
            }
            DuplicatePolicy::Overwrite => {
                let result = CryptoPrices::update_many()
                    .col_expr(crypto_prices::Column::PriceUsd, Expr::value(observation.price_usd))
                    .col_expr(crypto_prices::Column::MarketCap, Expr::value(observation.market_cap))
                    .col_expr(crypto_prices::Column::Volume, Expr::value(observation.volume))
                    .filter(crypto_prices::Column::Symbol.eq(observation.symbol.as_str()))
                    .filter(crypto_prices::Column::Date.eq(observation.date))
                    .exec(&txn)
                    .await?;

                if result.rows_affected > 0 {
                    summary.updated += result.rows_affected;
                    continue;
                }
            }
        }

        let row = observation.to_active_model().insert(&txn).await?;
        summary.inserted_ids.push(row.id);
    }

    txn.commit().await?;

    info!(
        inserted = summary.inserted(),
        updated = summary.updated,
        skipped = summary.skipped,
        policy = ?policy,
        "Observations written to crypto_prices"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use sea_orm::{DatabaseBackend, DbErr, MockDatabase, MockExecResult};

    fn observation(day: u32) -> PriceObservation {
        PriceObservation {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            symbol: "BTC".to_string(),
            price_usd: Some(dec!(42000.50)),
            market_cap: Some(dec!(823000000000)),
            volume: Some(dec!(25000000000)),
        }
    }

    fn stored(id: i32, obs: &PriceObservation) -> crypto_prices::Model {
        crypto_prices::Model {
            id,
            date: obs.date,
            symbol: obs.symbol.clone(),
            price_usd: obs.price_usd,
            market_cap: obs.market_cap,
            volume: obs.volume,
            created_at: None,
        }
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("accumulate".parse::<DuplicatePolicy>().unwrap(), DuplicatePolicy::Accumulate);
        assert_eq!(" SKIP ".parse::<DuplicatePolicy>().unwrap(), DuplicatePolicy::Skip);
        assert_eq!("upsert".parse::<DuplicatePolicy>().unwrap(), DuplicatePolicy::Overwrite);
        assert!("merge".parse::<DuplicatePolicy>().is_err());
    }

    #[tokio::test]
    async fn test_accumulate_inserts_every_observation() {
        let first = observation(1);
        let second = observation(1);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![stored(7, &first)], vec![stored(8, &second)]])
            .into_connection();

        let summary = write_observations(&db, &[first, second], DuplicatePolicy::Accumulate)
            .await
            .unwrap();

        // Same (date, symbol) twice: both kept as history
        assert_eq!(summary.inserted_ids, vec![7, 8]);
        assert_eq!(summary.skipped, 0);
    }

    #[tokio::test]
    async fn test_skip_policy_keeps_existing_rows() {
        let existing = observation(1);
        let fresh = observation(2);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([
                vec![stored(1, &existing)],
                vec![],
                vec![stored(2, &fresh)],
            ])
            .into_connection();

        let summary = write_observations(&db, &[existing, fresh], DuplicatePolicy::Skip)
            .await
            .unwrap();

        assert_eq!(summary.inserted_ids, vec![2]);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_overwrite_updates_or_inserts() {
        let existing = observation(1);
        let fresh = observation(2);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                },
            ])
            .append_query_results([vec![stored(3, &fresh)]])
            .into_connection();

        let summary = write_observations(&db, &[existing, fresh], DuplicatePolicy::Overwrite)
            .await
            .unwrap();

        assert_eq!(summary.updated, 1);
        assert_eq!(summary.inserted_ids, vec![3]);
    }

    #[tokio::test]
    async fn test_failed_insert_surfaces_persistence_error() {
        let first = observation(1);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![stored(1, &first)]])
            .append_query_errors([DbErr::Custom("connection lost".to_string())])
            .into_connection();

        let err = write_observations(&db, &[first, observation(2)], DuplicatePolicy::Accumulate)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::PersistenceError(_)));
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();

        let summary = write_observations(&db, &[], DuplicatePolicy::Accumulate)
            .await
            .unwrap();

        assert_eq!(summary, WriteSummary::default());
    }
}
