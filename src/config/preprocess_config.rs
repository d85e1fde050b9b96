use crate::domain::errors::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// How detected outliers are treated once a column is flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinsorizeMode {
    /// Clip every non-missing value of the column to the quantile band.
    #[default]
    Global,
    /// Clip only the flagged values to the quantile band.
    PointOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreprocessConfig {
    pub remove_zero_volume: bool,
    pub winsorize_enabled: bool,
    /// Lower and upper quantiles of the clipping band.
    pub winsorize_limits: (f64, f64),
    pub winsorize_mode: WinsorizeMode,
    pub outlier_detection_window: usize,
    pub outlier_threshold: f64,
    pub min_trading_days: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            remove_zero_volume: true,
            winsorize_enabled: true,
            winsorize_limits: (0.01, 0.99),
            winsorize_mode: WinsorizeMode::Global,
            outlier_detection_window: 60,
            outlier_threshold: 10.0,
            min_trading_days: 20,
        }
    }
}

impl PreprocessConfig {
    pub fn validate(&self) -> Result<()> {
        let (lower, upper) = self.winsorize_limits;
        if !(0.0..=1.0).contains(&lower) || !(0.0..=1.0).contains(&upper) || lower >= upper {
            return Err(PipelineError::Config(format!(
                "preprocess.winsorize_limits must satisfy 0 <= lower < upper <= 1, got ({}, {})",
                lower, upper
            )));
        }
        if self.outlier_detection_window < 2 {
            return Err(PipelineError::Config(
                "preprocess.outlier_detection_window must be at least 2".to_string(),
            ));
        }
        if !(self.outlier_threshold.is_finite() && self.outlier_threshold > 0.0) {
            return Err(PipelineError::Config(format!(
                "preprocess.outlier_threshold must be > 0, got {}",
                self.outlier_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PreprocessConfig::default();
        assert_eq!(config.min_trading_days, 20);
        assert_eq!(config.winsorize_mode, WinsorizeMode::Global);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inverted_limits_rejected() {
        let config = PreprocessConfig {
            winsorize_limits: (0.9, 0.1),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mode_deserializes_snake_case() {
        let config: PreprocessConfig = toml::from_str("winsorize_mode = \"point_only\"").unwrap();
        assert_eq!(config.winsorize_mode, WinsorizeMode::PointOnly);
    }
}
