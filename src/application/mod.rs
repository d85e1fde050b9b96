// Market data ingestion and cleaning
pub mod market_data;

// Per-symbol indicators
pub mod features;

// Labels
pub mod targets;

// Cross-validation, training and inference
pub mod ml;

// Stage orchestration
pub mod pipeline;
