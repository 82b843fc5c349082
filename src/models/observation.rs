use chrono::NaiveDate;
use rust_decimal::Decimal;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

use crate::entities::crypto_prices;

/// A coin the pipeline ingests: CoinGecko id plus the ticker stored in `crypto_prices`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedCoin {
    pub coin_id: String,
    pub symbol: String,
}

impl TrackedCoin {
    pub fn new(coin_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            coin_id: coin_id.into(),
            symbol: symbol.into().to_uppercase(),
        }
    }
}

/// One price / market cap / volume sample for a symbol on a date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub date: NaiveDate,
    pub symbol: String,
    pub price_usd: Option<Decimal>,
    pub market_cap: Option<Decimal>,
    pub volume: Option<Decimal>,
}

impl PriceObservation {
    pub fn has_any_value(&self) -> bool {
        self.price_usd.is_some() || self.market_cap.is_some() || self.volume.is_some()
    }

    /// Insertable row; `id` and `created_at` are left to the database
    pub fn to_active_model(&self) -> crypto_prices::ActiveModel {
        crypto_prices::ActiveModel {
            date: Set(self.date),
            symbol: Set(self.symbol.clone()),
            price_usd: Set(self.price_usd),
            market_cap: Set(self.market_cap),
            volume: Set(self.volume),
            ..Default::default()
        }
    }
}

impl From<crypto_prices::Model> for PriceObservation {
    fn from(row: crypto_prices::Model) -> Self {
        Self {
            date: row.date,
            symbol: row.symbol,
            price_usd: row.price_usd,
            market_cap: row.market_cap,
            volume: row.volume,
        }
    }
}
