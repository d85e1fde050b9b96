use crate::domain::errors::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Indicator windows for the feature builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeatureConfig {
    pub sma_windows: Vec<usize>,
    pub ema_windows: Vec<usize>,
    pub slope_window: usize,
    pub atr_window: usize,
    pub stdev_window: usize,
    pub bollinger_window: usize,
    pub bollinger_std: f64,
    pub volume_ratio_window: usize,
    pub return_windows: Vec<usize>,
    pub rsi_window: usize,
    /// (fast, slow, signal)
    pub macd_windows: (usize, usize, usize),
    pub stoch_window: usize,
    pub stoch_smooth: usize,
    pub williams_window: usize,
    pub cci_window: usize,
    pub cci_constant: f64,
    pub adx_window: usize,
    /// Minimum symbol history before the extended indicators are computed.
    pub extended_min_periods: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sma_windows: vec![5, 10, 20, 50],
            ema_windows: vec![21],
            slope_window: 20,
            atr_window: 14,
            stdev_window: 20,
            bollinger_window: 20,
            bollinger_std: 2.0,
            volume_ratio_window: 20,
            return_windows: vec![1, 5, 10],
            rsi_window: 14,
            macd_windows: (12, 26, 9),
            stoch_window: 14,
            stoch_smooth: 3,
            williams_window: 14,
            cci_window: 20,
            cci_constant: 0.015,
            adx_window: 14,
            extended_min_periods: 14,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<()> {
        let scalar_windows = [
            ("slope_window", self.slope_window),
            ("atr_window", self.atr_window),
            ("stdev_window", self.stdev_window),
            ("bollinger_window", self.bollinger_window),
            ("volume_ratio_window", self.volume_ratio_window),
            ("rsi_window", self.rsi_window),
            ("stoch_window", self.stoch_window),
            ("stoch_smooth", self.stoch_smooth),
            ("williams_window", self.williams_window),
            ("cci_window", self.cci_window),
            ("adx_window", self.adx_window),
        ];
        if let Some((name, _)) = scalar_windows.iter().find(|(_, w)| *w == 0) {
            return Err(PipelineError::Config(format!(
                "features.{} must be at least 1",
                name
            )));
        }
        for (name, windows) in [
            ("sma_windows", &self.sma_windows),
            ("ema_windows", &self.ema_windows),
            ("return_windows", &self.return_windows),
        ] {
            if windows.contains(&0) {
                return Err(PipelineError::Config(format!(
                    "features.{} must not contain 0",
                    name
                )));
            }
        }
        let (fast, slow, signal) = self.macd_windows;
        if fast == 0 || signal == 0 || fast >= slow {
            return Err(PipelineError::Config(format!(
                "features.macd_windows must satisfy 0 < fast < slow and signal > 0, got {:?}",
                self.macd_windows
            )));
        }
        if !(self.bollinger_std.is_finite() && self.bollinger_std > 0.0) {
            return Err(PipelineError::Config(format!(
                "features.bollinger_std must be > 0, got {}",
                self.bollinger_std
            )));
        }
        if !(self.cci_constant.is_finite() && self.cci_constant > 0.0) {
            return Err(PipelineError::Config(format!(
                "features.cci_constant must be > 0, got {}",
                self.cci_constant
            )));
        }
        Ok(())
    }
}
