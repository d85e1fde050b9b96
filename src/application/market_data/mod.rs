// Market data ingestion and cleaning
pub mod loader;
pub mod preprocessor;
pub mod statistical_features;
