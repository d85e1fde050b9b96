//! Dataset Builder Binary
//!
//! Loads daily quotes for a list of symbols, cleans them, derives features and
//! next-day direction labels, and writes the dataset plus its feature list.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use dailytrade::application::pipeline::DatasetPipeline;
use dailytrade::config::PipelineConfig;
use dailytrade::domain::market::Interval;
use dailytrade::infrastructure::CsvDirectoryProvider;
use dailytrade::infrastructure::observability::init_logging;
use dailytrade::infrastructure::persistence::features_path;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Build the daily direction dataset", long_about = None)]
struct Args {
    /// TOML pipeline configuration. Its values win over the flags below.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma-separated list of symbols
    #[arg(long, value_delimiter = ',')]
    symbols: Vec<String>,

    /// Start date (YYYY-MM-DD)
    #[arg(long)]
    start: Option<NaiveDate>,

    /// End date (YYYY-MM-DD)
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Bar interval (1d, 1wk, 1mo)
    #[arg(long)]
    interval: Option<Interval>,

    /// Minimum next-day return for an up label
    #[arg(long)]
    margin: Option<f64>,

    /// Winsorization tail, e.g. 0.01 clips to the 1%/99% quantiles
    #[arg(long)]
    winsorize_pct: Option<f64>,

    /// Drop symbols with fewer rows than this
    #[arg(long)]
    min_trading_days: Option<usize>,

    /// Directory with one CSV of quotes per symbol
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Output dataset CSV
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn has_overrides(&self) -> bool {
        !self.symbols.is_empty()
            || self.start.is_some()
            || self.end.is_some()
            || self.interval.is_some()
            || self.margin.is_some()
            || self.winsorize_pct.is_some()
            || self.min_trading_days.is_some()
            || self.data_dir.is_some()
            || self.output.is_some()
    }

    fn apply(&self, config: &mut PipelineConfig) {
        if !self.symbols.is_empty() {
            config.load.symbols = self.symbols.clone();
        }
        if self.start.is_some() {
            config.load.start = self.start;
        }
        if self.end.is_some() {
            config.load.end = self.end;
        }
        if let Some(interval) = self.interval {
            config.load.interval = interval;
        }
        if let Some(margin) = self.margin {
            config.targets.margin_pct = margin;
        }
        if let Some(pct) = self.winsorize_pct {
            config.preprocess.winsorize_limits = (pct, 1.0 - pct);
        }
        if let Some(days) = self.min_trading_days {
            config.preprocess.min_trading_days = days;
        }
        if let Some(dir) = &self.data_dir {
            config.paths.data_dir = dir.clone();
        }
        if let Some(output) = &self.output {
            config.paths.dataset_path = output.clone();
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

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(args.verbose);

    let config = resolve_config(&args)?;
    anyhow::ensure!(
        !config.load.symbols.is_empty(),
        "No symbols given (use --symbols or a config file)"
    );
    info!(
        "Building dataset for {} symbols from {}",
        config.load.symbols.len(),
        config.paths.data_dir.display()
    );

    let provider = Arc::new(CsvDirectoryProvider::new(config.paths.data_dir.clone()));
    let pipeline = DatasetPipeline::new(&config, provider).context("Invalid pipeline configuration")?;
    let dataset = pipeline.build().await.context("Dataset build failed")?;

    let output = &config.paths.dataset_path;
    dataset
        .save(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("\n{}", "=".repeat(60));
    println!("✅ Dataset built");
    println!("   Rows:      {}", dataset.frame.len());
    println!("   Symbols:   {}", dataset.frame.distinct_symbols().len());
    println!("   Features:  {}", dataset.model_inputs.len());
    println!("   Outliers:  {}", dataset.clean_report.total_outliers());
    println!("   Dataset:   {}", output.display());
    println!("   Columns:   {}", features_path(output).display());
    println!("{}", "=".repeat(60));
    Ok(())
}
