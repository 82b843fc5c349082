//! `SeaORM` Entity for the crypto_prices table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "crypto_prices")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub date: Date,
    pub symbol: String,
    #[sea_orm(column_type = "Decimal(None)", nullable)]
    pub price_usd: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(None)", nullable)]
    pub market_cap: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(None)", nullable)]
    pub volume: Option<Decimal>,
    /// Set by the database default at insert time
    pub created_at: Option<DateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
