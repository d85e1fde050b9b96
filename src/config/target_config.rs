use crate::domain::errors::{PipelineError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetConfig {
    /// A row is labelled up when its next-day return is strictly above this.
    pub margin_pct: f64,
    pub min_return_threshold: f64,
    pub max_return_threshold: f64,
    pub remove_incomplete_days: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            margin_pct: 0.0,
            min_return_threshold: -0.5,
            max_return_threshold: 0.5,
            remove_incomplete_days: true,
        }
    }
}

impl TargetConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.margin_pct.is_finite() {
            return Err(PipelineError::Config(format!(
                "targets.margin_pct must be finite, got {}",
                self.margin_pct
            )));
        }
        if !self.min_return_threshold.is_finite()
            || !self.max_return_threshold.is_finite()
            || self.min_return_threshold >= self.max_return_threshold
        {
            return Err(PipelineError::Config(format!(
                "targets.min_return_threshold ({}) must be below max_return_threshold ({})",
                self.min_return_threshold, self.max_return_threshold
            )));
        }
        Ok(())
    }
}
