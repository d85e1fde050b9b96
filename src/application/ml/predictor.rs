use crate::domain::errors::Result;
use crate::domain::ml::FeatureMatrix;

/// Interface for direction classifiers used at inference time.
pub trait DirectionPredictor: Send + Sync {
    /// Probability of an up move (0.0 to 1.0) per row.
    /// Columns are matched by name, not position.
    fn predict_proba(&self, features: &FeatureMatrix) -> Result<Vec<f64>>;

    /// Hard 0/1 labels at a 0.5 cut.
    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<u8>> {
        Ok(self
            .predict_proba(features)?
            .into_iter()
            .map(|p| u8::from(p >= 0.5))
            .collect())
    }

    /// Get model name/type
    fn name(&self) -> &str;
}
