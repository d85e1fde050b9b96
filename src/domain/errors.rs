use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised by the dataset and training pipeline.
///
/// Data-quality anomalies (outliers, zero volume, OHLC inversions, warm-up
/// NaNs) are never represented here: they are logged and flagged instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No data could be loaded for any symbol: {symbols:?}")]
    NoData { symbols: Vec<String> },

    #[error("Missing required columns for {stage}: {missing:?}")]
    Schema {
        stage: &'static str,
        missing: Vec<String>,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Fetch failed for {symbol} after {attempts} attempt(s): {reason}")]
    Fetch {
        symbol: String,
        attempts: usize,
        reason: String,
    },

    #[error("Failed to parse {what}: {value:?}")]
    Parse { what: &'static str, value: String },

    #[error("Model is not fitted")]
    NotFitted,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl PipelineError {
    pub fn schema(stage: &'static str, missing: Vec<String>) -> Self {
        Self::Schema { stage, missing }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors a market-data fetch may recover from on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::Io { .. })
    }
}
