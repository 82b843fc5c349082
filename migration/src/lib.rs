pub use sea_orm_migration::prelude::*;

mod m20250720_000001_create_crypto_prices;
mod m20250720_000002_create_crypto_predictions;
mod m20250720_000003_create_sync_status;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250720_000001_create_crypto_prices::Migration),
            Box::new(m20250720_000002_create_crypto_predictions::Migration),
            Box::new(m20250720_000003_create_sync_status::Migration),
        ]
    }
}
