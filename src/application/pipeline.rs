//! Dataset assembly: Loader -> Preprocessor -> FeatureBuilder -> TargetGenerator.

use crate::application::features::FeatureBuilder;
use crate::application::market_data::loader::Loader;
use crate::application::market_data::preprocessor::{CleanReport, PreprocessStats, Preprocessor};
use crate::application::targets::{TargetGenerator, validate_targets};
use crate::config::PipelineConfig;
use crate::domain::dataset::Frame;
use crate::domain::errors::Result;
use crate::domain::ml::feature_registry::model_input_columns;
use crate::domain::ports::MarketDataProvider;
use crate::infrastructure::persistence::DatasetStore;
use std::path::Path;
use std::sync::Arc;
use tracing::{Span, info, info_span, warn};

/// Labelled dataset plus what was learned while building it.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub frame: Frame,
    /// Indicator columns produced by the feature builder.
    pub feature_names: Vec<String>,
    /// Every model-input column, in storage order. Persisted as the sidecar.
    pub model_inputs: Vec<String>,
    pub clean_report: CleanReport,
    pub preprocess_stats: PreprocessStats,
}

impl Dataset {
    pub fn save(&self, path: &Path) -> Result<()> {
        DatasetStore::save(&self.frame, path, &self.model_inputs)
    }
}

pub struct DatasetPipeline {
    loader: Loader,
    preprocessor: Preprocessor,
    features: FeatureBuilder,
    targets: TargetGenerator,
    span: Span,
}

impl DatasetPipeline {
    pub fn new(config: &PipelineConfig, provider: Arc<dyn MarketDataProvider>) -> Result<Self> {
        let span = info_span!("dataset_pipeline");
        Ok(Self {
            loader: Loader::new(provider, config.load.clone())?
                .with_span(info_span!(parent: &span, "loader")),
            preprocessor: Preprocessor::new(config.preprocess.clone())?
                .with_span(info_span!(parent: &span, "preprocessor")),
            features: FeatureBuilder::new(config.features.clone())?
                .with_span(info_span!(parent: &span, "feature_builder")),
            targets: TargetGenerator::new(config.targets.clone())?
                .with_span(info_span!(parent: &span, "target_generator")),
            span,
        })
    }

    /// Loads the configured symbols and runs every stage.
    pub async fn build(&self) -> Result<Dataset> {
        let raw = self.loader.load(&self.loader.config().symbols).await?;
        self.process(&raw)
    }

    /// Runs the synchronous stages on an already loaded frame.
    pub fn process(&self, raw: &Frame) -> Result<Dataset> {
        let _guard = self.span.enter();
        let (cleaned, clean_report) = self.preprocessor.clean_with_report(raw)?;
        let preprocess_stats = PreprocessStats::between(raw, &cleaned);
        info!(
            "Preprocessing removed {} records ({:.2}%), {} symbols",
            preprocess_stats.records_removed,
            preprocess_stats.removal_rate * 100.0,
            preprocess_stats.symbols_removed
        );

        let (featured, feature_names) = self.features.build(&cleaned)?;
        let labelled = self.targets.make_targets(&featured)?;
        if !validate_targets(&labelled) {
            warn!("Target validation reported problems");
        }
        let model_inputs = model_input_columns(&labelled);
        info!(
            "Dataset ready: {} rows, {} symbols, {} model inputs",
            labelled.len(),
            labelled.distinct_symbols().len(),
            model_inputs.len()
        );
        Ok(Dataset {
            frame: labelled,
            feature_names,
            model_inputs,
            clean_report,
            preprocess_stats,
        })
    }
}
