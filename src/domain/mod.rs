// Keyed column store
pub mod dataset;

// Domain-specific error types
pub mod errors;

// Market vocabulary (intervals, OHLCV columns, offsets)
pub mod market;

// Model inputs
pub mod ml;

// Port interfaces
pub mod ports;
