use clap::Parser;
use dotenvy::dotenv;

use crypto_forecast::config::PipelineConfig;
use crypto_forecast::services::reporting;
use crypto_forecast::{database, init_tracing};

/// Print the latest stored forecast run for each symbol
#[derive(Debug, Parser)]
#[command(name = "forecast_report")]
struct Args {
    /// Symbols to report; defaults to FORECAST_SYMBOLS
    #[arg(long, value_delimiter = ',')]
    symbol: Vec<String>,

    /// Print the forecast rows as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    dotenv().ok();
    init_tracing();

    let config = PipelineConfig::from_env()?;
    let db = database::connect(&config.database_url).await?;

    let symbols = if args.symbol.is_empty() {
        config.forecast_symbols.clone()
    } else {
        args.symbol.iter().map(|s| s.to_uppercase()).collect()
    };

    for symbol in &symbols {
        let history = reporting::history_stats(&db, symbol).await?;
        let stats = reporting::forecast_stats(&db, symbol).await?;
        let rows = reporting::latest_forecast(&db, symbol).await?;

        if args.json {
            println!("{}", serde_json::to_string_pretty(&rows)?);
            continue;
        }

        println!("== {} ==", symbol);
        println!(
            "history: {} rows ({} → {})",
            history.observations,
            history.first_date.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
            history.last_date.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
        );
        println!(
            "forecasts: {} rows over {} runs covering {} days, latest run {}",
            stats.total_forecasts,
            stats.forecast_runs,
            stats.unique_forecast_days,
            stats.latest_run.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
        );

        if rows.is_empty() {
            println!("no forecast stored yet");
            continue;
        }

        println!("{:<12} {:>18} {:>18} {:>18}", "ds", "yhat", "yhat_lower", "yhat_upper");
        for row in &rows {
            let fmt = |v: Option<rust_decimal::Decimal>| {
                v.map(|d| d.round_dp(2).to_string()).unwrap_or_else(|| "-".into())
            };
            println!(
                "{:<12} {:>18} {:>18} {:>18}",
                row.ds.to_string(),
                fmt(row.yhat),
                fmt(row.yhat_lower),
                fmt(row.yhat_upper)
            );
        }
    }

    Ok(())
}
