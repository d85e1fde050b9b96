pub mod booster;
pub mod cross_validation;
pub mod direction_model;
pub mod metrics;
pub mod predictor;
pub mod training;

pub use direction_model::DirectionModel;
pub use predictor::DirectionPredictor;
pub use training::{ModelTrainer, TrainingOutcome, TrainingSet};
