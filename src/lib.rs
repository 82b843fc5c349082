// src/lib.rs

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_LOG_FILTER: &str = "info,crypto_forecast=debug,sqlx=warn";

/// Install the fmt subscriber; `RUST_LOG` overrides the default filter
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub mod config;
pub mod database;
pub mod error;

pub mod entities {
    pub mod prelude;
    pub mod crypto_prices;
    pub mod crypto_predictions;
    pub mod sync_status;
}

pub mod services {
    pub mod coingecko;
    pub mod fetcher;
    pub mod price_writer;
    pub mod forecast_model;
    pub mod forecaster;
    pub mod sync_status;
    pub mod pipeline;
    pub mod backfill;
    pub mod reporting;
    pub mod export;
}

pub mod jobs;
pub mod models;
