use crate::domain::errors::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Boosting hyperparameters plus cross-validation and reporting settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub num_leaves: usize,
    /// Unlimited when `None`.
    pub max_depth: Option<usize>,
    pub learning_rate: f64,
    pub feature_fraction: f64,
    pub bagging_fraction: f64,
    pub bagging_freq: usize,
    pub min_child_samples: usize,
    pub reg_alpha: f64,
    pub reg_lambda: f64,
    pub max_bin: usize,
    pub random_state: u64,
    pub n_estimators: usize,
    pub early_stopping_rounds: usize,
    pub cv_splits: usize,
    pub importance_top_n: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_leaves: 31,
            max_depth: None,
            learning_rate: 0.05,
            feature_fraction: 0.8,
            bagging_fraction: 0.8,
            bagging_freq: 5,
            min_child_samples: 20,
            reg_alpha: 0.1,
            reg_lambda: 0.1,
            max_bin: 255,
            random_state: 42,
            n_estimators: 100,
            early_stopping_rounds: 10,
            cv_splits: 5,
            importance_top_n: 20,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_leaves < 2 {
            return Err(PipelineError::Config(
                "model.num_leaves must be at least 2".to_string(),
            ));
        }
        if self.max_depth == Some(0) {
            return Err(PipelineError::Config(
                "model.max_depth must be at least 1 when set".to_string(),
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(PipelineError::Config(format!(
                "model.learning_rate must be in (0, 1], got {}",
                self.learning_rate
            )));
        }
        for (name, value) in [
            ("feature_fraction", self.feature_fraction),
            ("bagging_fraction", self.bagging_fraction),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(PipelineError::Config(format!(
                    "model.{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.reg_alpha < 0.0 || self.reg_lambda < 0.0 {
            return Err(PipelineError::Config(
                "model.reg_alpha and model.reg_lambda must be >= 0".to_string(),
            ));
        }
        if self.max_bin < 2 {
            return Err(PipelineError::Config(
                "model.max_bin must be at least 2".to_string(),
            ));
        }
        if self.n_estimators == 0 {
            return Err(PipelineError::Config(
                "model.n_estimators must be at least 1".to_string(),
            ));
        }
        if self.cv_splits < 2 {
            return Err(PipelineError::Config(format!(
                "model.cv_splits must be at least 2, got {}",
                self.cv_splits
            )));
        }
        Ok(())
    }
}
