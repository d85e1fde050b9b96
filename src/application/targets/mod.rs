pub mod target_generator;

pub use target_generator::{TargetGenerator, TargetSummary, validate_targets};
