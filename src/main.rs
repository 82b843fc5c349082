use std::sync::Arc;

use crypto_forecast::config::PipelineConfig;
use crypto_forecast::jobs::daily_pipeline::start_daily_pipeline_job;
use crypto_forecast::services::coingecko::CoinGeckoService;
use crypto_forecast::{database, init_tracing};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = PipelineConfig::from_env().expect("Invalid configuration");
    let db = database::connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    let coingecko = CoinGeckoService::new(
        config.coingecko_api_key.clone(),
        config.coingecko_base_url.clone(),
    );

    tracing::info!(
        "Tracking {} coins, forecasting {:?}, every {}s",
        config.coins.len(),
        config.forecast_symbols,
        config.interval.as_secs()
    );

    let job = start_daily_pipeline_job(db, Arc::new(coingecko), config);

    if let Err(e) = job.await {
        tracing::error!("Daily pipeline job panicked: {}", e);
    }
}
