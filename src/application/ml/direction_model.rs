use crate::application::ml::booster::{Booster, EarlyStopping};
use crate::application::ml::cross_validation::{
    CrossValidationSummary, FoldRecord, TimeSeriesSplit,
};
use crate::application::ml::metrics::ClassificationMetrics;
use crate::application::ml::predictor::DirectionPredictor;
use crate::application::ml::training::TrainingSet;
use crate::config::ModelConfig;
use crate::domain::errors::{PipelineError, Result};
use crate::domain::ml::FeatureMatrix;
use crate::infrastructure::persistence::{load_json, save_json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{Span, debug, info, info_span, warn};

pub const MODEL_TYPE: &str = "gradient_boosted_trees";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// In-sample evaluation of a fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    #[serde(flatten)]
    pub metrics: ClassificationMetrics,
    pub n_samples: usize,
    pub pos_ratio: f64,
}

/// What gets written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelBundle {
    model_type: String,
    config: ModelConfig,
    feature_names: Vec<String>,
    booster: Booster,
    importances: Vec<FeatureImportance>,
    cross_validation: Option<CrossValidationSummary>,
}

/// Binary next-day direction classifier over named features.
pub struct DirectionModel {
    config: ModelConfig,
    feature_names: Vec<String>,
    booster: Option<Booster>,
    cross_validation: Option<CrossValidationSummary>,
    span: Span,
}

impl DirectionModel {
    pub fn new(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            feature_names: Vec::new(),
            booster: None,
            cross_validation: None,
            span: info_span!("direction_model"),
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn is_fitted(&self) -> bool {
        self.booster.is_some()
    }

    pub fn cross_validation(&self) -> Option<&CrossValidationSummary> {
        self.cross_validation.as_ref()
    }

    pub fn set_cross_validation(&mut self, summary: CrossValidationSummary) {
        self.cross_validation = Some(summary);
    }

    /// Rounds used by the fitted booster.
    pub fn n_estimators(&self) -> Option<usize> {
        self.booster.as_ref().map(Booster::num_trees)
    }

    /// Fits on the whole set for `config.n_estimators` rounds, no early stopping.
    pub fn fit(&mut self, set: &TrainingSet) -> Result<()> {
        let _guard = self.span.enter();
        info!(
            "Fitting on {} samples x {} features, {} rounds",
            set.len(),
            set.x.n_features(),
            self.config.n_estimators
        );
        let booster = Booster::train(&self.config, &set.x, &set.y, None)?;
        self.feature_names = set.x.names().to_vec();
        self.booster = Some(booster);
        Ok(())
    }

    /// Expanding-window CV with early stopping on each validation block.
    /// The model itself is left untouched apart from the stored summary.
    pub fn cross_validate(&mut self, set: &TrainingSet) -> Result<CrossValidationSummary> {
        let _guard = self.span.enter();
        let splitter = TimeSeriesSplit::new(self.config.cv_splits)?;
        let folds = splitter.split(&set.timestamps)?;

        let mut records = Vec::with_capacity(folds.len());
        for fold in folds {
            let train_rows: Vec<usize> = fold.train.clone().collect();
            let valid_rows: Vec<usize> = fold.validation.clone().collect();
            let x_train = set.x.take_rows(&train_rows);
            let x_valid = set.x.take_rows(&valid_rows);
            let y_train = &set.y[fold.train.clone()];
            let y_valid = &set.y[fold.validation.clone()];

            let booster = Booster::train(
                &self.config,
                &x_train,
                y_train,
                Some(EarlyStopping {
                    x: &x_valid,
                    y: y_valid,
                    patience: self.config.early_stopping_rounds,
                }),
            )?;
            let best_iteration = booster.best_iteration().unwrap_or(booster.num_trees());
            let probs = booster.predict_proba(&x_valid);
            let metrics = ClassificationMetrics::compute(y_valid, &probs);

            let mut grouped: BTreeMap<&str, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
            for (offset, row) in fold.validation.clone().enumerate() {
                let entry = grouped.entry(set.symbols[row].as_str()).or_default();
                entry.0.push(set.y[row]);
                entry.1.push(probs[offset]);
            }
            let by_symbol = grouped
                .into_iter()
                .map(|(symbol, (y, p))| (symbol.to_string(), ClassificationMetrics::compute(&y, &p)))
                .collect();

            info!(
                "Fold {}: train {} rows, validation {} rows, best iteration {}, auc {}",
                fold.index + 1,
                train_rows.len(),
                valid_rows.len(),
                best_iteration,
                metrics
                    .auc
                    .map_or_else(|| "n/a".to_string(), |v| format!("{:.4}", v))
            );
            records.push(FoldRecord {
                fold: fold.index,
                train_size: train_rows.len(),
                validation_size: valid_rows.len(),
                train_end: set.timestamps[fold.train.end - 1],
                validation_start: set.timestamps[fold.validation.start],
                best_iteration,
                metrics,
                by_symbol,
            });
        }

        let summary = CrossValidationSummary::from_folds(records);
        for (name, m) in &summary.metrics {
            if let (Some(mean), Some(std)) = (m.mean, m.std) {
                info!("CV {}: {:.4} +/- {:.4}", name, mean, std);
            }
        }
        self.cross_validation = Some(summary.clone());
        Ok(summary)
    }

    fn booster(&self) -> Result<&Booster> {
        self.booster.as_ref().ok_or(PipelineError::NotFitted)
    }

    /// Aligns `features` to the training column order.
    fn aligned<'a>(&self, features: &'a FeatureMatrix) -> Result<std::borrow::Cow<'a, FeatureMatrix>> {
        if features.names() == self.feature_names.as_slice() {
            return Ok(std::borrow::Cow::Borrowed(features));
        }
        warn!("Feature order differs from training, reindexing");
        Ok(std::borrow::Cow::Owned(features.reindex(&self.feature_names)?))
    }

    pub fn evaluate(&self, set: &TrainingSet) -> Result<EvaluationMetrics> {
        let probs = self.predict_proba(&set.x)?;
        let positives = set.y.iter().filter(|y| **y == 1.0).count();
        Ok(EvaluationMetrics {
            metrics: ClassificationMetrics::compute(&set.y, &probs),
            n_samples: set.len(),
            pos_ratio: if set.is_empty() {
                0.0
            } else {
                positives as f64 / set.len() as f64
            },
        })
    }

    /// Gain importance, largest first.
    pub fn feature_importance(&self, top_n: usize) -> Result<Vec<FeatureImportance>> {
        let gains = self.booster()?.gain_importance();
        let mut ranked: Vec<FeatureImportance> = self
            .feature_names
            .iter()
            .zip(gains)
            .map(|(feature, importance)| FeatureImportance {
                feature: feature.clone(),
                importance,
            })
            .collect();
        ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        ranked.truncate(top_n);
        Ok(ranked)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bundle = ModelBundle {
            model_type: MODEL_TYPE.to_string(),
            config: self.config.clone(),
            feature_names: self.feature_names.clone(),
            booster: self.booster()?.clone(),
            importances: self.feature_importance(self.feature_names.len())?,
            cross_validation: self.cross_validation.clone(),
        };
        save_json(&bundle, path)?;
        info!("Model saved to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bundle: ModelBundle = load_json(path)?;
        if bundle.booster.n_features() != bundle.feature_names.len() {
            return Err(PipelineError::Validation(format!(
                "model at {} has {} feature names for {} booster inputs",
                path.display(),
                bundle.feature_names.len(),
                bundle.booster.n_features()
            )));
        }
        debug!("Loaded model with {} features", bundle.feature_names.len());
        Ok(Self {
            config: bundle.config,
            feature_names: bundle.feature_names,
            booster: Some(bundle.booster),
            cross_validation: bundle.cross_validation,
            span: info_span!("direction_model"),
        })
    }
}

impl DirectionPredictor for DirectionModel {
    fn predict_proba(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        let booster = self.booster()?;
        let aligned = self.aligned(features)?;
        Ok(booster.predict_proba(&aligned))
    }

    fn name(&self) -> &str {
        MODEL_TYPE
    }
}
