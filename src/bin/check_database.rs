use dotenvy::dotenv;
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};

use crypto_forecast::config::PipelineConfig;
use crypto_forecast::services::reporting;
use crypto_forecast::{database, init_tracing};

const TABLES: [&str; 3] = ["crypto_prices", "crypto_predictions", "sync_status"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_tracing();

    let config = PipelineConfig::from_env()?;
    let db = database::connect(&config.database_url).await?;

    let version = db
        .query_one(Statement::from_string(
            DatabaseBackend::Postgres,
            "SELECT version() AS version",
        ))
        .await?
        .map(|row| row.try_get::<String>("", "version"))
        .transpose()?
        .unwrap_or_default();
    println!("Connected: {}", version);

    for table in TABLES {
        let exists = db
            .query_one(Statement::from_sql_and_values(
                DatabaseBackend::Postgres,
                "SELECT to_regclass($1)::text AS name",
                [table.into()],
            ))
            .await?
            .map(|row| row.try_get::<Option<String>>("", "name"))
            .transpose()?
            .flatten()
            .is_some();
        if !exists {
            println!("{:<20} MISSING", table);
            continue;
        }

        let count = db
            .query_one(Statement::from_string(
                DatabaseBackend::Postgres,
                format!("SELECT COUNT(*) AS count FROM {}", table),
            ))
            .await?
            .map(|row| row.try_get::<i64>("", "count"))
            .transpose()?
            .unwrap_or_default();
        println!("{:<20} {} rows", table, count);
    }

    println!("\nLatest prices:");
    for price in reporting::latest_prices(&db).await? {
        println!(
            "  {:<6} {} price={}",
            price.symbol,
            price.date,
            price.price_usd.map(|v| v.to_string()).unwrap_or_else(|| "-".into())
        );
    }

    Ok(())
}
