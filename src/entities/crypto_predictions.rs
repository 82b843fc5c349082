//! Table definition for crypto_predictions
//!
//! The table has no primary key, so it is addressed through sea-query
//! statements instead of a SeaORM entity.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use sea_orm::{DeriveIden, FromQueryResult};
use serde::Serialize;

#[derive(DeriveIden, Clone, Copy)]
pub enum CryptoPredictions {
    Table,
    Ds,
    Yhat,
    YhatLower,
    YhatUpper,
    Symbol,
    CreatedAt,
}

#[derive(Debug, Clone, PartialEq, FromQueryResult, Serialize)]
pub struct PredictionRow {
    pub ds: NaiveDate,
    pub yhat: Option<Decimal>,
    pub yhat_lower: Option<Decimal>,
    pub yhat_upper: Option<Decimal>,
    pub symbol: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}
