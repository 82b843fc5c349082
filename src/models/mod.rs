pub mod forecast;
pub mod observation;

pub use forecast::ForecastPoint;
pub use observation::{PriceObservation, TrackedCoin};
