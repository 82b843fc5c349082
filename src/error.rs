//! Error taxonomy for the ingestion and forecast pipeline

use sea_orm::DbErr;

/// Errors surfaced by the fetcher, writer, forecaster and pipeline
#[derive(Debug)]
pub enum PipelineError {
    /// Network failure, rate limit, error status or malformed body.
    /// `transient` errors are retried by the fetcher.
    ProviderError { message: String, transient: bool },
    /// Provider has no data for the coin/date
    DataUnavailable { coin_id: String, date: String },
    PersistenceError(String),
    InsufficientHistory {
        symbol: String,
        found: usize,
        required: usize,
    },
    ModelFitError(String),
    Config(String),
    /// Another run holds the lease for this job
    RunInProgress(String),
}

impl PipelineError {
    pub fn provider(message: impl Into<String>, transient: bool) -> Self {
        PipelineError::ProviderError {
            message: message.into(),
            transient,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::ProviderError { transient: true, .. })
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::ProviderError { message, .. } => write!(f, "Provider error: {}", message),
            PipelineError::DataUnavailable { coin_id, date } => {
                write!(f, "Data unavailable for {} on {}", coin_id, date)
            }
            PipelineError::PersistenceError(msg) => write!(f, "Persistence error: {}", msg),
            PipelineError::InsufficientHistory {
                symbol,
                found,
                required,
            } => write!(
                f,
                "Insufficient history for {}: {} points, need at least {}",
                symbol, found, required
            ),
            PipelineError::ModelFitError(msg) => write!(f, "Model fit error: {}", msg),
            PipelineError::Config(msg) => write!(f, "Invalid config: {}", msg),
            PipelineError::RunInProgress(job) => write!(f, "Run already in progress for {}", job),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<DbErr> for PipelineError {
    fn from(e: DbErr) -> Self {
        PipelineError::PersistenceError(e.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        // Body decode failures are not worth retrying; everything else is network level
        let transient = !e.is_decode();
        PipelineError::provider(e.to_string(), transient)
    }
}
