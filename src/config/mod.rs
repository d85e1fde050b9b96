//! Configuration module for the daily direction pipeline.
//!
//! Every stage takes an immutable, validated value struct. The structs are
//! grouped in [`PipelineConfig`], which is read from a TOML file whose
//! sections mirror the stages (`[load]`, `[preprocess]`, `[features]`,
//! `[targets]`, `[model]`, `[paths]`). Unknown keys are rejected.

mod feature_config;
mod load_config;
mod model_config;
mod preprocess_config;
mod target_config;

pub use feature_config::FeatureConfig;
pub use load_config::LoadConfig;
pub use model_config::ModelConfig;
pub use preprocess_config::{PreprocessConfig, WinsorizeMode};
pub use target_config::TargetConfig;

use crate::domain::errors::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable naming a default config file for the binaries.
pub const CONFIG_ENV_VAR: &str = "DAILYTRADE_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Directory read by the CSV market-data provider.
    pub data_dir: PathBuf,
    pub dataset_path: PathBuf,
    pub model_path: PathBuf,
    pub write_report: bool,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/quotes"),
            dataset_path: PathBuf::from("data/ml/dataset.csv"),
            model_path: PathBuf::from("models/direction_model.json"),
            write_report: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub load: LoadConfig,
    pub preprocess: PreprocessConfig,
    pub features: FeatureConfig,
    pub targets: TargetConfig,
    pub model: ModelConfig,
    pub paths: PathsConfig,
}

impl PipelineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded pipeline configuration from {:?}", path);
        Ok(config)
    }

    /// Reads the file named by `DAILYTRADE_CONFIG`, if the variable is set.
    pub fn from_env() -> Result<Option<Self>> {
        match env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(&path)).map(Some),
            _ => Ok(None),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.load.validate()?;
        self.preprocess.validate()?;
        self.features.validate()?;
        self.targets.validate()?;
        self.model.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [load]
            symbols = ["7203.T", "6758.T"]
            start = "2022-01-01"
            interval = "1wk"

            [targets]
            margin_pct = 0.01

            [model]
            cv_splits = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.load.symbols.len(), 2);
        assert_eq!(config.load.interval.as_str(), "1wk");
        assert_eq!(config.targets.margin_pct, 0.01);
        assert_eq!(config.model.cv_splits, 3);
        assert_eq!(config.preprocess.min_trading_days, 20);
        assert_eq!(config.features.sma_windows, vec![5, 10, 20, 50]);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = PipelineConfig::from_toml_str("[model]\nnum_trees = 10\n").unwrap_err();
        assert!(matches!(err, PipelineError::Toml(_)));
    }

    #[test]
    fn test_range_violation_is_config_error() {
        let err = PipelineConfig::from_toml_str("[model]\nlearning_rate = 0.0\n").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = PipelineConfig::from_file(Path::new("/nonexistent/pipeline.toml")).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
