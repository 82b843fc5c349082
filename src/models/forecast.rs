use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

/// One forecasted day with its prediction interval
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub ds: NaiveDate,
    pub yhat: Decimal,
    pub yhat_lower: Decimal,
    pub yhat_upper: Decimal,
    pub symbol: String,
}
