pub mod feature_builder;
pub mod indicators;

pub use feature_builder::FeatureBuilder;
