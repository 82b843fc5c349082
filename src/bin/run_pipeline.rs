use chrono::{NaiveDate, Utc};
use clap::Parser;
use dotenvy::dotenv;

use crypto_forecast::config::PipelineConfig;
use crypto_forecast::services::coingecko::CoinGeckoService;
use crypto_forecast::services::pipeline::{run_pipeline, RunOptions};
use crypto_forecast::{database, init_tracing};

/// Run the fetch → write → forecast pipeline once
#[derive(Debug, Parser)]
#[command(name = "run_pipeline")]
struct Args {
    /// Observation date (YYYY-MM-DD), defaults to today in UTC
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Stop after writing observations
    #[arg(long)]
    skip_forecast: bool,
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

    let options = RunOptions {
        date: args.date.unwrap_or_else(|| Utc::now().date_naive()),
        skip_forecast: args.skip_forecast,
    };

    let report = run_pipeline(&db, &coingecko, &config, options).await?;

    println!("Pipeline run for {}", report.date);
    for obs in &report.observations {
        println!(
            "  {:<6} price={} market_cap={} volume={}",
            obs.symbol,
            obs.price_usd.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
            obs.market_cap.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
            obs.volume.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
        );
    }
    println!(
        "  rows: {} inserted, {} updated, {} skipped",
        report.write.inserted(),
        report.write.updated,
        report.write.skipped
    );
    for run in &report.forecasts {
        if let (Some(first), Some(last)) = (run.points.first(), run.points.last()) {
            println!(
                "  forecast {}: {} → {} (yhat {} → {}) from {} days of history",
                run.symbol, first.ds, last.ds, first.yhat, last.yhat, run.history_points
            );
        }
    }
    if report.pruned > 0 {
        println!("  pruned {} old forecast rows", report.pruned);
    }

    Ok(())
}
