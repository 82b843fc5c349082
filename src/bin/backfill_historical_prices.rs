use clap::Parser;
use dotenvy::dotenv;
use tokio::time::sleep;

use crypto_forecast::config::PipelineConfig;
use crypto_forecast::services::backfill::backfill_coin;
use crypto_forecast::services::coingecko::CoinGeckoService;
use crypto_forecast::services::price_writer::DuplicatePolicy;
use crypto_forecast::services::sync_status::{self, intervals, jobs};
use crypto_forecast::{database, init_tracing};

/// Load daily history for the configured coins
#[derive(Debug, Parser)]
#[command(name = "backfill_historical_prices")]
struct Args {
    /// Days to fetch; by default 30 for a symbol with under 30 rows, else 7
    #[arg(long)]
    days: Option<u32>,

    /// Only backfill this CoinGecko id
    #[arg(long)]
    coin: Option<String>,

    /// accumulate, skip or overwrite
    #[arg(long, default_value = "skip")]
    policy: DuplicatePolicy,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    dotenv().ok();
    init_tracing();

    let config = PipelineConfig::from_env()?;
    let db = database::connect(&config.database_url).await?;
    let coingecko = CoinGeckoService::new(
        config.coingecko_api_key.clone(),
        config.coingecko_base_url.clone(),
    );

    let coins: Vec<_> = config
        .coins
        .iter()
        .filter(|c| args.coin.as_deref().is_none_or(|id| c.coin_id == id))
        .collect();

    if coins.is_empty() {
        tracing::warn!("No configured coin matches {:?}", args.coin);
        return Ok(());
    }

    tracing::info!("Backfilling {} coins...", coins.len());

    let mut failures = Vec::new();
    for (index, coin) in coins.iter().enumerate() {
        if index > 0 {
            sleep(config.rate_limit).await;
        }

        match backfill_coin(&db, &coingecko, coin, args.days, args.policy, config.retry).await {
            Ok(summary) => {
                println!(
                    "{:<6} {} inserted, {} updated, {} skipped",
                    coin.symbol,
                    summary.inserted(),
                    summary.updated,
                    summary.skipped
                );
            }
            Err(e) => {
                tracing::error!("Backfill failed for {}: {}", coin.coin_id, e);
                failures.push(format!("{}: {}", coin.coin_id, e));
            }
        }
    }

    if failures.is_empty() {
        sync_status::record_success(&db, jobs::HISTORICAL_BACKFILL, intervals::HISTORICAL_BACKFILL)
            .await?;
        Ok(())
    } else {
        let message = failures.join("; ");
        sync_status::record_failure(
            &db,
            jobs::HISTORICAL_BACKFILL,
            &message,
            intervals::HISTORICAL_BACKFILL,
        )
        .await?;
        Err(format!("backfill failed for {} coins: {}", failures.len(), message).into())
    }
}
