use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;

use crate::error::PipelineError;

/// Connect and bring the schema up to date
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, PipelineError> {
    let mut options = ConnectOptions::new(database_url.to_owned());
    options
        .max_connections(5)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);

    tracing::info!("Connecting to database...");
    let db = Database::connect(options).await?;

    tracing::info!("Running migrations...");
    migration::Migrator::up(&db, None).await?;

    Ok(db)
}
