#![allow(dead_code)]

use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr, Statement};
use std::env;
use std::time::{SystemTime, UNIX_EPOCH};

use crypto_forecast::database;

/// Connect to TEST_DATABASE_URL and run migrations.
/// Returns None when the variable is unset so the suite can run without Postgres.
pub async fn setup_test_db() -> Option<DatabaseConnection> {
    let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping database test");
        return None;
    };

    Some(
        database::connect(&database_url)
            .await
            .expect("Failed to connect to test database"),
    )
}

/// Symbol no other test run uses, at most 10 characters
pub fn unique_symbol(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    let suffix = format!("{:06}", (nanos / 1000 + std::process::id()) % 1_000_000);
    format!("{}{}", &prefix[..prefix.len().min(4)], suffix)
}

pub async fn count_prices(db: &DatabaseConnection, symbol: &str) -> Result<i64, DbErr> {
    let row = db
        .query_one(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            "SELECT COUNT(*) AS count FROM crypto_prices WHERE symbol = $1",
            [symbol.into()],
        ))
        .await?;
    match row {
        Some(row) => row.try_get("", "count"),
        None => Ok(0),
    }
}

/// Remove every row a test wrote for `symbol`
pub async fn cleanup_symbol(db: &DatabaseConnection, symbol: &str) -> Result<(), DbErr> {
    for table in ["crypto_prices", "crypto_predictions"] {
        db.execute(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            format!("DELETE FROM {} WHERE symbol = $1", table),
            [symbol.into()],
        ))
        .await?;
    }
    Ok(())
}
