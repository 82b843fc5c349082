//! CSV snapshots of fetched observations and forecast runs

use std::fs;
use std::path::{Path, PathBuf};

use crate::models::PriceObservation;
use crate::services::forecaster::ForecastRun;

type ExportResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Columns: date, symbol, price_usd, market_cap, volume
pub fn observations_csv(observations: &[PriceObservation]) -> ExportResult<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["date", "symbol", "price_usd", "market_cap", "volume"])?;

    for obs in observations {
        wtr.write_record([
            obs.date.to_string(),
            obs.symbol.clone(),
            obs.price_usd.map(|v| v.to_string()).unwrap_or_default(),
            obs.market_cap.map(|v| v.to_string()).unwrap_or_default(),
            obs.volume.map(|v| v.to_string()).unwrap_or_default(),
        ])?;
    }

    let data = wtr.into_inner().map_err(|e| e.to_string())?;
    Ok(String::from_utf8(data)?)
}

/// Columns: ds, yhat, yhat_lower, yhat_upper, symbol, created_at
pub fn forecast_csv(run: &ForecastRun) -> ExportResult<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["ds", "yhat", "yhat_lower", "yhat_upper", "symbol", "created_at"])?;

    let created_at = run.created_at.to_string();
    for point in &run.points {
        wtr.write_record([
            point.ds.to_string(),
            point.yhat.to_string(),
            point.yhat_lower.to_string(),
            point.yhat_upper.to_string(),
            point.symbol.clone(),
            created_at.clone(),
        ])?;
    }

    let data = wtr.into_inner().map_err(|e| e.to_string())?;
    Ok(String::from_utf8(data)?)
}

fn write_file(dir: &Path, name: String, contents: &str) -> ExportResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(name);
    fs::write(&path, contents)?;
    tracing::info!("Exported {}", path.display());
    Ok(path)
}

/// Writes `prices_<date>.csv`; a run without observations writes nothing
pub fn save_observations(dir: &Path, observations: &[PriceObservation]) -> ExportResult<Option<PathBuf>> {
    let Some(first) = observations.first() else {
        return Ok(None);
    };
    let csv = observations_csv(observations)?;
    write_file(dir, format!("prices_{}.csv", first.date), &csv).map(Some)
}

/// Writes `forecast_<symbol>_<yyyymmddThhmmss>.csv`
pub fn save_forecast(dir: &Path, run: &ForecastRun) -> ExportResult<PathBuf> {
    let csv = forecast_csv(run)?;
    let name = format!(
        "forecast_{}_{}.csv",
        run.symbol.to_lowercase(),
        run.created_at.format("%Y%m%dT%H%M%S")
    );
    write_file(dir, name, &csv)
}
