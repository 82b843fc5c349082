use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // No identity column: a forecast run is identified by (symbol, created_at)
        manager
            .create_table(
                Table::create()
                    .table(CryptoPredictions::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(CryptoPredictions::Ds).date().not_null())
                    .col(ColumnDef::new(CryptoPredictions::Yhat).decimal().null())
                    .col(ColumnDef::new(CryptoPredictions::YhatLower).decimal().null())
                    .col(ColumnDef::new(CryptoPredictions::YhatUpper).decimal().null())
                    .col(ColumnDef::new(CryptoPredictions::Symbol).string_len(10).null())
                    .col(
                        ColumnDef::new(CryptoPredictions::CreatedAt)
                            .timestamp()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .to_owned(),
            )
            .await?;

        // Dashboards select the latest run per symbol
        manager
            .create_index(
                Index::create()
                    .name("idx_crypto_predictions_symbol_created_at")
                    .table(CryptoPredictions::Table)
                    .col(CryptoPredictions::Symbol)
                    .col((CryptoPredictions::CreatedAt, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CryptoPredictions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CryptoPredictions {
    Table,
    Ds,
    Yhat,
    YhatLower,
    YhatUpper,
    Symbol,
    CreatedAt,
}
