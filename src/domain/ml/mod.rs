pub mod feature_matrix;
pub mod feature_registry;

pub use feature_matrix::FeatureMatrix;
