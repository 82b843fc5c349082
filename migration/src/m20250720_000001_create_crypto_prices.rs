use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CryptoPrices::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CryptoPrices::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CryptoPrices::Date).date().not_null())
                    .col(
                        ColumnDef::new(CryptoPrices::Symbol)
                            .string_len(10)
                            .not_null(),
                    )
                    .col(ColumnDef::new(CryptoPrices::PriceUsd).decimal().null())
                    .col(ColumnDef::new(CryptoPrices::MarketCap).decimal().null())
                    .col(ColumnDef::new(CryptoPrices::Volume).decimal().null())
                    .col(
                        ColumnDef::new(CryptoPrices::CreatedAt)
                            .timestamp()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .to_owned(),
            )
            .await?;

        // Not unique: repeated (symbol, date) rows are additive history
        manager
            .create_index(
                Index::create()
                    .name("idx_crypto_prices_symbol_date")
                    .table(CryptoPrices::Table)
                    .col(CryptoPrices::Symbol)
                    .col(CryptoPrices::Date)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CryptoPrices::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CryptoPrices {
    Table,
    Id,
    Date,
    Symbol,
    PriceUsd,
    MarketCap,
    Volume,
    CreatedAt,
}
