use crate::config::LoadConfig;
use crate::domain::dataset::frame::Frame;
use crate::domain::errors::{PipelineError, Result};
use crate::domain::market::ohlcv::{
    ADJ_CLOSE, CLOSE, HIGH, LOW, OPEN, REQUIRED_VALUE_COLUMNS, SYMBOL, TIMESTAMP, VALUE_COLUMNS,
    VOLUME,
};
use crate::domain::market::timezone::parse_timestamp;
use crate::domain::ports::{MarketDataProvider, RawTable};
use crate::infrastructure::core::retry::{RetryError, RetryPolicy};
use crate::infrastructure::persistence::DatasetStore;
use chrono::FixedOffset;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

/// Fetches per-symbol OHLCV from a provider and assembles one frame sorted
/// by (timestamp, symbol).
pub struct Loader {
    provider: Arc<dyn MarketDataProvider>,
    config: LoadConfig,
    offset: FixedOffset,
    retry: RetryPolicy,
    span: Span,
}

impl Loader {
    pub fn new(provider: Arc<dyn MarketDataProvider>, config: LoadConfig) -> Result<Self> {
        config.validate()?;
        let offset = config.target_offset()?;
        let retry = RetryPolicy::from_config(provider.name().to_string(), &config);
        Ok(Self {
            provider,
            config,
            offset,
            retry,
            span: info_span!("loader"),
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// Loads every symbol; fails only when none of them yields data.
    pub async fn load(&self, symbols: &[String]) -> Result<Frame> {
        let span = self.span.clone();
        async move {
            info!(
                "Start loading {} symbols via {} ({}, {:?} to {:?})",
                symbols.len(),
                self.provider.name(),
                self.config.interval,
                self.config.start,
                self.config.end
            );

            let results: Vec<(String, Result<Frame>)> = stream::iter(symbols.iter().cloned())
                .map(|symbol| async move {
                    let result = self.fetch_symbol(&symbol).await;
                    (symbol, result)
                })
                .buffered(self.config.max_concurrency)
                .collect()
                .await;

            let mut frames = Vec::new();
            let mut failed = Vec::new();
            for (symbol, result) in results {
                match result {
                    Ok(frame) => {
                        info!("Loaded {} rows for {}", frame.len(), symbol);
                        frames.push(frame);
                    }
                    Err(e) => {
                        error!("Failed to load {}: {}", symbol, e);
                        failed.push(symbol);
                    }
                }
            }

            if frames.is_empty() {
                return Err(PipelineError::NoData {
                    symbols: symbols.to_vec(),
                });
            }
            if !failed.is_empty() {
                warn!(
                    "{} of {} symbols failed: {:?}",
                    failed.len(),
                    symbols.len(),
                    failed
                );
            }

            let combined = Frame::concat(frames)?.sorted_by_time_symbol();
            info!(
                "Loading completed: {} rows across {} symbols",
                combined.len(),
                combined.distinct_symbols().len()
            );

            if self.config.save_raw {
                DatasetStore::save_raw(&combined, &self.config.save_dir)?;
            }
            Ok(combined)
        }
        .instrument(span)
        .await
    }

    async fn fetch_symbol(&self, symbol: &str) -> Result<Frame> {
        let provider = &self.provider;
        let range = self.config.date_range();
        let interval = self.config.interval;

        let table = self
            .retry
            .call(
                move || provider.fetch(symbol, range, interval),
                PipelineError::is_transient,
            )
            .await
            .map_err(|e| match e {
                RetryError::Exhausted { attempts, source } => PipelineError::Fetch {
                    symbol: symbol.to_string(),
                    attempts,
                    reason: source.to_string(),
                },
                RetryError::Aborted { source, .. } => source,
            })?;

        if table.is_empty() {
            return Err(PipelineError::Fetch {
                symbol: symbol.to_string(),
                attempts: 1,
                reason: "provider returned no rows".to_string(),
            });
        }

        let frame = normalize_table(symbol, &table, &self.offset)?;
        validate_symbol(symbol, &frame);
        Ok(frame)
    }
}

/// Canonical header: trimmed, lowercase, spaces and dashes as underscores,
/// with the usual provider aliases folded in.
pub fn normalize_header(header: &str) -> String {
    let normalized: String = header
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect();
    match normalized.as_str() {
        "date" | "datetime" => TIMESTAMP.to_string(),
        "adjclose" => ADJ_CLOSE.to_string(),
        _ => normalized,
    }
}

/// Turns a raw provider table into a frame for one symbol, sorted by time.
///
/// Non-canonical columns are dropped. Unparseable numbers become missing.
pub fn normalize_table(symbol: &str, table: &RawTable, offset: &FixedOffset) -> Result<Frame> {
    let headers: Vec<String> = table.headers.iter().map(|h| normalize_header(h)).collect();
    let position = |name: &str| headers.iter().position(|h| h == name);

    let mut missing: Vec<String> = Vec::new();
    if position(TIMESTAMP).is_none() {
        missing.push(TIMESTAMP.to_string());
    }
    missing.extend(
        REQUIRED_VALUE_COLUMNS
            .iter()
            .filter(|c| position(c).is_none())
            .map(|c| c.to_string()),
    );
    if !missing.is_empty() {
        return Err(PipelineError::schema("loader", missing));
    }
    let ts_idx = position(TIMESTAMP).unwrap_or_default();
    let value_columns: Vec<(&str, usize)> = VALUE_COLUMNS
        .iter()
        .filter_map(|c| position(c).map(|i| (*c, i)))
        .collect();
    if position(SYMBOL).is_some() {
        debug!("Ignoring provider symbol column for {}", symbol);
    }

    let mut timestamps = Vec::with_capacity(table.len());
    let mut values: Vec<Vec<f64>> = vec![Vec::with_capacity(table.len()); value_columns.len()];
    let mut unparseable = 0usize;
    for record in &table.records {
        let raw_ts = record.get(ts_idx).map(String::as_str).unwrap_or_default();
        timestamps.push(parse_timestamp(raw_ts, offset)?);
        for (slot, (_, idx)) in values.iter_mut().zip(&value_columns) {
            let cell = record.get(*idx).map(|s| s.trim()).unwrap_or_default();
            let value = match cell {
                "" => f64::NAN,
                c if c.eq_ignore_ascii_case("nan") || c.eq_ignore_ascii_case("null") => f64::NAN,
                c => c.parse::<f64>().unwrap_or_else(|_| {
                    unparseable += 1;
                    f64::NAN
                }),
            };
            slot.push(value);
        }
    }
    if unparseable > 0 {
        warn!("{}: {} unparseable values treated as missing", symbol, unparseable);
    }

    let mut frame = Frame::new(timestamps, vec![symbol.to_string(); table.len()])?;
    for ((name, _), column) in value_columns.iter().zip(values) {
        frame.insert_float(*name, column)?;
    }
    Ok(frame.sorted_by_time_symbol())
}

/// Log-only sanity checks on one symbol's rows.
fn validate_symbol(symbol: &str, frame: &Frame) {
    for column in [OPEN, HIGH, LOW, CLOSE, ADJ_CLOSE] {
        if let Some(values) = frame.float(column) {
            let negative = values.iter().filter(|v| **v < 0.0).count();
            if negative > 0 {
                warn!("{}: {} negative values in {}", symbol, negative, column);
            }
        }
    }

    if let Some(volume) = frame.float(VOLUME) {
        let zero = volume.iter().filter(|v| **v == 0.0).count();
        if zero > 0 {
            warn!("{}: {} zero-volume days", symbol, zero);
        }
    }

    if let (Some(open), Some(high), Some(low), Some(close)) = (
        frame.float(OPEN),
        frame.float(HIGH),
        frame.float(LOW),
        frame.float(CLOSE),
    ) {
        let invalid_high = (0..frame.len())
            .filter(|&i| high[i] < open[i].max(close[i]))
            .count();
        let invalid_low = (0..frame.len())
            .filter(|&i| low[i] > open[i].min(close[i]))
            .count();
        if invalid_high > 0 {
            warn!("{}: {} rows with high below open/close", symbol, invalid_high);
        }
        if invalid_low > 0 {
            warn!("{}: {} rows with low above open/close", symbol, invalid_low);
        }
    }

    let duplicates = frame
        .timestamps()
        .windows(2)
        .filter(|w| w[0] == w[1])
        .count();
    if duplicates > 0 {
        warn!("{}: {} duplicate timestamps", symbol, duplicates);
    }
}
