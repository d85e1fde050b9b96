use crate::application::ml::cross_validation::{MetricSummary, TimeSeriesSplit};
use crate::application::ml::direction_model::{
    DirectionModel, EvaluationMetrics, FeatureImportance, MODEL_TYPE,
};
use crate::config::ModelConfig;
use crate::domain::dataset::{Frame, Timestamp};
use crate::domain::errors::{PipelineError, Result};
use crate::domain::ml::FeatureMatrix;
use crate::domain::ml::feature_registry::{CONTAINS_LEADING_NAN, Y_UP};
use crate::infrastructure::persistence::{report_path, save_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{Span, info, info_span, warn};

const STAGE: &str = "training";
const MIN_RECOMMENDED_SAMPLES: usize = 100;

/// Model inputs and labels in chronological row order.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub x: FeatureMatrix,
    pub y: Vec<f64>,
    pub symbols: Vec<String>,
    pub timestamps: Vec<Timestamp>,
}

impl TrainingSet {
    /// Drops warm-up rows, checks labels, and fills missing feature values
    /// forward within each symbol and then with zero.
    pub fn from_frame(frame: &Frame, feature_names: &[String]) -> Result<Self> {
        frame.require_columns(STAGE, &[Y_UP])?;
        let sorted = frame.sorted_by_time_symbol();
        let data = match sorted.flag(CONTAINS_LEADING_NAN) {
            Some(flags) => {
                let keep: Vec<bool> = flags.iter().map(|f| !f).collect();
                let dropped = keep.iter().filter(|k| !**k).count();
                if dropped > 0 {
                    info!("Dropped {} warm-up rows", dropped);
                }
                sorted.filter(&keep)
            }
            None => sorted,
        };

        let y = data.require_float(STAGE, Y_UP)?.to_vec();
        if let Some(bad) = y.iter().find(|v| **v != 0.0 && **v != 1.0) {
            return Err(PipelineError::Validation(format!(
                "labels must be 0 or 1, found {}",
                bad
            )));
        }

        let mut x = FeatureMatrix::from_frame(&data, feature_names)?;
        let symbols = data.symbols().to_vec();
        if x.has_missing() {
            let missing: usize = x
                .columns()
                .iter()
                .map(|c| c.iter().filter(|v| v.is_nan()).count())
                .sum();
            warn!(
                "{} missing feature values, forward-filling within symbol then zero-filling",
                missing
            );
            fill_missing(&mut x, &symbols);
        }

        let set = Self {
            x,
            y,
            symbols,
            timestamps: data.timestamps().to_vec(),
        };
        set.warn_on_quality();
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn positive_rate(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.y.iter().sum::<f64>() / self.len() as f64
    }

    /// Fatal checks before any fit.
    pub fn validate(&self, splitter: &TimeSeriesSplit) -> Result<()> {
        if self.len() < splitter.min_rows() {
            return Err(PipelineError::Validation(format!(
                "{} samples are not enough for {} splits",
                self.len(),
                splitter.n_splits()
            )));
        }
        if self.x.n_features() == 0 {
            return Err(PipelineError::Validation(
                "no feature columns to train on".to_string(),
            ));
        }
        Ok(())
    }

    fn warn_on_quality(&self) {
        let rate = self.positive_rate();
        if !self.is_empty() && !(0.1..=0.9).contains(&rate) {
            warn!("Severe class imbalance: positive rate {:.3}", rate);
        }
        if self.len() < MIN_RECOMMENDED_SAMPLES {
            warn!(
                "Only {} samples (recommended at least {})",
                self.len(),
                MIN_RECOMMENDED_SAMPLES
            );
        }
    }
}

fn fill_missing(x: &mut FeatureMatrix, symbols: &[String]) {
    for column in x.columns_mut() {
        let mut last: HashMap<&str, f64> = HashMap::new();
        for (value, symbol) in column.iter_mut().zip(symbols) {
            if value.is_nan() {
                *value = last.get(symbol.as_str()).copied().unwrap_or(0.0);
            } else {
                last.insert(symbol.as_str(), *value);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub generated_at: DateTime<Utc>,
    pub model_type: String,
    pub validation_method: String,
    pub cv_splits: usize,
    pub n_estimators: usize,
    pub n_samples: usize,
    pub n_features: usize,
}

/// Written beside the model as `<model_stem>_report.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub evaluation_metrics: EvaluationMetrics,
    pub cross_validation: BTreeMap<String, MetricSummary>,
    pub cross_validation_by_symbol: BTreeMap<String, BTreeMap<String, Option<f64>>>,
    pub feature_importance: Vec<FeatureImportance>,
    pub metadata: ReportMetadata,
}

pub struct TrainingOutcome {
    pub model: DirectionModel,
    pub report: EvaluationReport,
}

impl TrainingOutcome {
    /// Saves the model and, when asked, the report next to it.
    pub fn persist(&self, model_path: &Path, write_report: bool) -> Result<()> {
        self.model.save(model_path)?;
        if write_report {
            let path = report_path(model_path);
            save_json(&self.report, &path)?;
            info!("Evaluation report saved to {}", path.display());
        }
        Ok(())
    }
}

/// Cross-validates, then refits on everything with the median best round.
pub struct ModelTrainer {
    config: ModelConfig,
    span: Span,
}

impl ModelTrainer {
    pub fn new(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            span: info_span!("model_trainer"),
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn train(&self, frame: &Frame, feature_names: &[String]) -> Result<TrainingOutcome> {
        let _guard = self.span.enter();
        let set = TrainingSet::from_frame(frame, feature_names)?;
        self.train_set(&set)
    }

    pub fn train_set(&self, set: &TrainingSet) -> Result<TrainingOutcome> {
        let _guard = self.span.enter();
        let splitter = TimeSeriesSplit::new(self.config.cv_splits)?;
        set.validate(&splitter)?;
        info!(
            "Training on {} samples, {} features, positive rate {:.3}",
            set.len(),
            set.x.n_features(),
            set.positive_rate()
        );

        let mut cv_model = DirectionModel::new(self.config.clone())?.with_span(self.span.clone());
        let cv = cv_model.cross_validate(set)?;

        let n_estimators = final_rounds(&cv.best_iterations());
        info!("Final fit with n_estimators = {}", n_estimators);
        let final_config = ModelConfig {
            n_estimators,
            ..self.config.clone()
        };
        let mut model = DirectionModel::new(final_config)?.with_span(self.span.clone());
        model.fit(set)?;

        let evaluation = model.evaluate(set)?;
        info!(
            "In-sample: auc {:?}, accuracy {:?}, pos_ratio {:.3}",
            evaluation.metrics.auc, evaluation.metrics.accuracy, evaluation.pos_ratio
        );
        let importance = model.feature_importance(self.config.importance_top_n)?;
        for (rank, item) in importance.iter().take(10).enumerate() {
            info!("  {:>2}. {} ({:.4})", rank + 1, item.feature, item.importance);
        }

        let report = EvaluationReport {
            evaluation_metrics: evaluation,
            cross_validation: cv.metrics.clone(),
            cross_validation_by_symbol: cv.by_symbol.clone(),
            feature_importance: importance,
            metadata: ReportMetadata {
                generated_at: Utc::now(),
                model_type: MODEL_TYPE.to_string(),
                validation_method: "time_series_split".to_string(),
                cv_splits: self.config.cv_splits,
                n_estimators,
                n_samples: set.len(),
                n_features: set.x.n_features(),
            },
        };
        model.set_cross_validation(cv);
        Ok(TrainingOutcome { model, report })
    }
}

/// floor(median(best rounds)), at least one.
pub fn final_rounds(best_iterations: &[usize]) -> usize {
    if best_iterations.is_empty() {
        return 1;
    }
    let median = Data::new(best_iterations.iter().map(|b| *b as f64).collect::<Vec<_>>()).median();
    (median.floor() as usize).max(1)
}
