//! Direction Model Training Binary
//!
//! Cross-validates a gradient-boosted direction classifier on a persisted
//! dataset, refits on all rows, and writes the model and its report.

use anyhow::{Context, Result};
use clap::Parser;
use dailytrade::application::ml::ModelTrainer;
use dailytrade::config::PipelineConfig;
use dailytrade::infrastructure::observability::init_logging;
use dailytrade::infrastructure::persistence::{DatasetStore, report_path};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Train the daily direction model", long_about = None)]
struct Args {
    /// TOML pipeline configuration. Its values win over the flags below.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dataset CSV produced by build_dataset
    #[arg(long)]
    input: Option<PathBuf>,

    /// Model JSON output path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Time-series cross-validation folds
    #[arg(long)]
    cv_splits: Option<usize>,

    #[arg(long)]
    num_leaves: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    /// Boosting rounds per fold (early stopping may use fewer)
    #[arg(long)]
    n_estimators: Option<usize>,

    /// Skip writing the evaluation report
    #[arg(long)]
    no_report: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn has_overrides(&self) -> bool {
        self.input.is_some()
            || self.output.is_some()
            || self.cv_splits.is_some()
            || self.num_leaves.is_some()
            || self.learning_rate.is_some()
            || self.n_estimators.is_some()
            || self.no_report
    }

    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(input) = &self.input {
            config.paths.dataset_path = input.clone();
        }
        if let Some(output) = &self.output {
            config.paths.model_path = output.clone();
        }
        if let Some(splits) = self.cv_splits {
            config.model.cv_splits = splits;
        }
        if let Some(leaves) = self.num_leaves {
            config.model.num_leaves = leaves;
        }
        if let Some(lr) = self.learning_rate {
            config.model.learning_rate = lr;
        }
        if let Some(n) = self.n_estimators {
            config.model.n_estimators = n;
        }
        if self.no_report {
            config.paths.write_report = false;
        }
    }
}

fn resolve_config(args: &Args) -> Result<PipelineConfig> {
    let from_file = match &args.config {
        Some(path) => Some(
            PipelineConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
        ),
        None => PipelineConfig::from_env().context("Failed to load config from environment")?,
    };
    match from_file {
        Some(config) => {
            if args.has_overrides() {
                warn!("A config file is in use; command-line overrides are ignored");
            }
            Ok(config)
        }
        None => {
            let mut config = PipelineConfig::default();
            args.apply(&mut config);
            config.validate().context("Invalid command-line options")?;
            Ok(config)
        }
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(args.verbose);

    let config = resolve_config(&args)?;
    let input = &config.paths.dataset_path;
    info!("Loading dataset from {}", input.display());
    let (frame, feature_names) = DatasetStore::load(input)
        .with_context(|| format!("Failed to read dataset {}", input.display()))?;

    let trainer = ModelTrainer::new(config.model.clone()).context("Invalid model configuration")?;
    let outcome = trainer
        .train(&frame, &feature_names)
        .context("Training failed")?;

    let model_path = &config.paths.model_path;
    outcome
        .persist(model_path, config.paths.write_report)
        .with_context(|| format!("Failed to write {}", model_path.display()))?;

    let auc = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{:.4}", v));
    println!("\n{}", "=".repeat(60));
    println!("✅ Model trained");
    println!("   Samples:        {}", outcome.report.metadata.n_samples);
    println!("   Features:       {}", outcome.report.metadata.n_features);
    println!("   n_estimators:   {}", outcome.report.metadata.n_estimators);
    println!(
        "   CV AUC:         {}",
        auc(outcome.report.cross_validation.get("auc").and_then(|m| m.mean))
    );
    println!(
        "   In-sample AUC:  {}",
        auc(outcome.report.evaluation_metrics.metrics.auc)
    );
    println!("   Model:          {}", model_path.display());
    if config.paths.write_report {
        println!("   Report:         {}", report_path(model_path).display());
    }
    println!("{}", "=".repeat(60));
    Ok(())
}
