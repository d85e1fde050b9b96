use crate::application::market_data::statistical_features::{
    quantile, rolling_median, rolling_std,
};
use crate::config::{PreprocessConfig, WinsorizeMode};
use crate::domain::dataset::frame::Frame;
use crate::domain::errors::Result;
use crate::domain::market::ohlcv::{
    CLOSE, HIGH, LOW, OPEN, PRICE_COLUMNS, REQUIRED_VALUE_COLUMNS, VOLUME,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{Span, debug, error, info, info_span, warn};

/// Rolling statistics emit nothing with fewer observations than this.
const OUTLIER_MIN_PERIODS: usize = 10;
const MAX_WINSORIZE_PASSES: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct OutlierRecord {
    pub symbol: String,
    pub column: String,
    pub count: usize,
    /// Clipping band applied, (lower, upper).
    pub band: (f64, f64),
}

/// What one `clean` pass changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanReport {
    pub rows_in: usize,
    pub rows_out: usize,
    pub duplicates_removed: usize,
    pub zero_volume_removed: BTreeMap<String, usize>,
    pub outliers: Vec<OutlierRecord>,
    pub symbols_removed: BTreeMap<String, usize>,
    pub ohlc_violations: usize,
}

impl CleanReport {
    pub fn outlier_count(&self, symbol: &str, column: &str) -> usize {
        self.outliers
            .iter()
            .find(|o| o.symbol == symbol && o.column == column)
            .map_or(0, |o| o.count)
    }

    pub fn total_outliers(&self) -> usize {
        self.outliers.iter().map(|o| o.count).sum()
    }
}

/// Before/after summary of a preprocessing pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessStats {
    pub records_before: usize,
    pub records_after: usize,
    pub records_removed: usize,
    pub removal_rate: f64,
    pub symbols_before: usize,
    pub symbols_after: usize,
    pub symbols_removed: usize,
}

impl PreprocessStats {
    pub fn between(before: &Frame, after: &Frame) -> Self {
        let records_removed = before.len().saturating_sub(after.len());
        let symbols_before = before.distinct_symbols().len();
        let symbols_after = after.distinct_symbols().len();
        Self {
            records_before: before.len(),
            records_after: after.len(),
            records_removed,
            removal_rate: if before.is_empty() {
                0.0
            } else {
                records_removed as f64 / before.len() as f64
            },
            symbols_before,
            symbols_after,
            symbols_removed: symbols_before.saturating_sub(symbols_after),
        }
    }
}

/// Cleans a combined OHLCV frame. Data-quality problems are logged and
/// repaired or dropped; only a broken schema is an error.
pub struct Preprocessor {
    config: PreprocessConfig,
    span: Span,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            span: info_span!("preprocessor"),
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    pub fn clean(&self, frame: &Frame) -> Result<Frame> {
        self.clean_with_report(frame).map(|(cleaned, _)| cleaned)
    }

    pub fn clean_with_report(&self, frame: &Frame) -> Result<(Frame, CleanReport)> {
        let _guard = self.span.enter();
        frame.require_columns("preprocessing", REQUIRED_VALUE_COLUMNS)?;
        info!(
            "Start preprocessing {} records ({} symbols)",
            frame.len(),
            frame.distinct_symbols().len()
        );

        let mut report = CleanReport {
            rows_in: frame.len(),
            ..Default::default()
        };

        let mut data = self.remove_duplicates(frame, &mut report);
        if self.config.remove_zero_volume {
            data = self.remove_zero_volume(&data, &mut report)?;
        }
        if self.config.winsorize_enabled {
            data = self.handle_outliers(&data, &mut report)?;
        }
        data = self.enforce_min_trading_days(&data, &mut report);
        report.ohlc_violations = self.final_validation(&data)?;
        report.rows_out = data.len();

        info!(
            "Preprocessing completed: {} -> {} records",
            report.rows_in, report.rows_out
        );
        Ok((data, report))
    }

    fn remove_duplicates(&self, frame: &Frame, report: &mut CleanReport) -> Frame {
        let sorted = frame.sorted_by_time_symbol();
        let keep: Vec<bool> = (0..sorted.len())
            .map(|i| {
                i == 0
                    || sorted.timestamps()[i] != sorted.timestamps()[i - 1]
                    || sorted.symbols()[i] != sorted.symbols()[i - 1]
            })
            .collect();
        let deduped = sorted.filter(&keep);
        report.duplicates_removed = sorted.len() - deduped.len();
        if report.duplicates_removed > 0 {
            warn!("Removed {} duplicate records", report.duplicates_removed);
        }
        deduped
    }

    fn remove_zero_volume(&self, frame: &Frame, report: &mut CleanReport) -> Result<Frame> {
        let volume = frame.require_float("preprocessing", VOLUME)?;
        let keep: Vec<bool> = volume.iter().map(|v| *v != 0.0).collect();
        for (i, kept) in keep.iter().enumerate() {
            if !kept {
                *report
                    .zero_volume_removed
                    .entry(frame.symbols()[i].clone())
                    .or_insert(0) += 1;
            }
        }
        for (symbol, count) in &report.zero_volume_removed {
            info!("Removed {} zero-volume days for {}", count, symbol);
        }
        Ok(frame.filter(&keep))
    }

    fn handle_outliers(&self, frame: &Frame, report: &mut CleanReport) -> Result<Frame> {
        let columns: Vec<&str> = PRICE_COLUMNS
            .iter()
            .copied()
            .filter(|c| frame.float(c).is_some())
            .collect();
        if columns.is_empty() {
            warn!("No price columns found for outlier handling");
            return Ok(frame.clone());
        }

        let mut parts = Vec::new();
        for (symbol, mut part) in frame.partition_by_symbol() {
            if part.len() < self.config.outlier_detection_window {
                debug!(
                    "Skipping outlier detection for {}: {} rows < window {}",
                    symbol,
                    part.len(),
                    self.config.outlier_detection_window
                );
                parts.push(part);
                continue;
            }
            for column in &columns {
                let Some(values) = part.float_mut(column) else {
                    continue;
                };
                if let Some(record) = self.winsorize_column(&symbol, column, values) {
                    report.outliers.push(record);
                }
            }
            parts.push(part);
        }
        Ok(Frame::concat(parts)?.sorted_by_time_symbol())
    }

    /// Detects outliers in one symbol's column and clips in place.
    ///
    /// The band is taken from the values not flagged in the current pass, and
    /// passes repeat until one finds nothing to change, so a cleaned column
    /// has no outliers left to clip.
    fn winsorize_column(
        &self,
        symbol: &str,
        column: &str,
        values: &mut [f64],
    ) -> Option<OutlierRecord> {
        let (lower_q, upper_q) = self.config.winsorize_limits;
        let mut flagged = vec![false; values.len()];
        let mut band = None;
        let mut settled = false;

        for _ in 0..MAX_WINSORIZE_PASSES {
            let flags = detect_outliers(
                values,
                self.config.outlier_detection_window,
                self.config.outlier_threshold,
            );
            if !flags.contains(&true) {
                settled = true;
                break;
            }
            let inliers: Vec<f64> = values
                .iter()
                .zip(&flags)
                .filter(|(_, f)| !**f)
                .map(|(v, _)| *v)
                .collect();
            let (lower, upper) = match (quantile(&inliers, lower_q), quantile(&inliers, upper_q)) {
                (Some(lower), Some(upper)) => (lower, upper),
                _ => (quantile(values, lower_q)?, quantile(values, upper_q)?),
            };

            let mut changed = false;
            for ((value, flag), seen) in values.iter_mut().zip(&flags).zip(flagged.iter_mut()) {
                *seen |= *flag;
                let selected = match self.config.winsorize_mode {
                    WinsorizeMode::Global => true,
                    WinsorizeMode::PointOnly => *flag,
                };
                if selected && value.is_finite() {
                    let clipped = value.clamp(lower, upper);
                    changed |= clipped != *value;
                    *value = clipped;
                }
            }
            band = Some((lower, upper));
            if !changed {
                settled = true;
                break;
            }
        }

        let band = band?;
        let count = flagged.iter().filter(|f| **f).count();
        warn!("Found {} outliers in {} for {}", count, column, symbol);
        if !settled {
            warn!(
                "{} for {} still had outliers after {} winsorize passes",
                column, symbol, MAX_WINSORIZE_PASSES
            );
        }
        info!(
            "Applied winsorization to {} for {} ({:?}, band [{:.4}, {:.4}])",
            column, symbol, self.config.winsorize_mode, band.0, band.1
        );
        Some(OutlierRecord {
            symbol: symbol.to_string(),
            column: column.to_string(),
            count,
            band,
        })
    }

    fn enforce_min_trading_days(&self, frame: &Frame, report: &mut CleanReport) -> Frame {
        let counts = frame.symbol_counts();
        let short: BTreeSet<&String> = counts
            .iter()
            .filter(|(_, n)| **n < self.config.min_trading_days)
            .map(|(s, _)| s)
            .collect();
        if short.is_empty() {
            return frame.clone();
        }

        warn!(
            "Removed {} symbols with insufficient trading days (< {} days)",
            short.len(),
            self.config.min_trading_days
        );
        for symbol in &short {
            let n = counts[*symbol];
            info!("  Removed {}: only {} trading days", symbol, n);
            report.symbols_removed.insert((*symbol).clone(), n);
        }
        let keep: Vec<bool> = frame.symbols().iter().map(|s| !short.contains(s)).collect();
        frame.filter(&keep)
    }

    fn final_validation(&self, frame: &Frame) -> Result<usize> {
        if frame.is_empty() {
            warn!("Final result is empty after preprocessing");
            return Ok(0);
        }

        let violations = count_ohlc_violations(
            frame.require_float("preprocessing", OPEN)?,
            frame.require_float("preprocessing", HIGH)?,
            frame.require_float("preprocessing", LOW)?,
            frame.require_float("preprocessing", CLOSE)?,
        );
        if violations > 0 {
            error!(
                "Found {} invalid OHLC relationships after preprocessing",
                violations
            );
        }

        info!("Final preprocessing summary by symbol:");
        for (symbol, part) in frame.partition_by_symbol() {
            let (Some(first), Some(last)) = (part.timestamps().first(), part.timestamps().last())
            else {
                continue;
            };
            let volume = part.require_float("preprocessing", VOLUME)?;
            let finite: Vec<f64> = volume.iter().copied().filter(|v| v.is_finite()).collect();
            let avg_volume = if finite.is_empty() {
                0.0
            } else {
                finite.iter().sum::<f64>() / finite.len() as f64
            };
            info!(
                "  {}: {} days, {} to {}, avg volume: {:.0}",
                symbol,
                part.len(),
                first.date_naive(),
                last.date_naive(),
                avg_volume
            );
        }
        Ok(violations)
    }
}

/// Flags values further than `threshold` standard deviations from the median
/// of the `window` values before them. A flat reference window flags nothing.
pub fn detect_outliers(values: &[f64], window: usize, threshold: f64) -> Vec<bool> {
    let min_periods = OUTLIER_MIN_PERIODS.min(window);
    let median = rolling_median(values, window, min_periods);
    let std = rolling_std(values, window, min_periods);
    values
        .iter()
        .enumerate()
        .map(|(i, x)| {
            let Some(prev) = i.checked_sub(1) else {
                return false;
            };
            let (m, s) = (median[prev], std[prev]);
            x.is_finite() && m.is_finite() && s.is_finite() && s > 0.0 && (x - m).abs() > threshold * s
        })
        .collect()
}

/// Rows where high < low, high < max(open, close) or low > min(open, close).
pub fn count_ohlc_violations(open: &[f64], high: &[f64], low: &[f64], close: &[f64]) -> usize {
    (0..open.len())
        .filter(|&i| {
            high[i] < low[i]
                || high[i] < open[i].max(close[i])
                || low[i] > open[i].min(close[i])
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset, TimeZone};

    fn frame(symbols: &[(&str, usize)], close: impl Fn(usize) -> f64) -> Frame {
        let utc = FixedOffset::east_opt(0).unwrap();
        let start = utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut ts = Vec::new();
        let mut sym = Vec::new();
        let mut closes = Vec::new();
        for (s, n) in symbols {
            for i in 0..*n {
                ts.push(start + Duration::days(i as i64));
                sym.push(s.to_string());
                closes.push(close(i));
            }
        }
        let mut f = Frame::new(ts, sym).unwrap();
        f.insert_float(OPEN, closes.clone()).unwrap();
        f.insert_float(HIGH, closes.iter().map(|c| c + 1.0).collect()).unwrap();
        f.insert_float(LOW, closes.iter().map(|c| c - 1.0).collect()).unwrap();
        f.insert_float(VOLUME, vec![1000.0; closes.len()]).unwrap();
        f.insert_float(CLOSE, closes).unwrap();
        f
    }

    #[test]
    fn test_duplicates_keep_first() {
        let base = frame(&[("A", 25)], |i| 100.0 + i as f64);
        let mut dup = base.take(&[0]);
        dup.float_mut(CLOSE).unwrap()[0] = 999.0;
        let combined = Frame::concat(vec![base, dup]).unwrap();

        let pre = Preprocessor::new(PreprocessConfig::default()).unwrap();
        let (cleaned, report) = pre.clean_with_report(&combined).unwrap();
        assert_eq!(report.duplicates_removed, 1);
        assert_eq!(cleaned.len(), 25);
        assert_eq!(cleaned.float(CLOSE).unwrap()[0], 100.0);
    }

    #[test]
    fn test_zero_volume_rows_dropped() {
        let mut f = frame(&[("A", 30)], |i| 100.0 + i as f64);
        f.float_mut(VOLUME).unwrap()[3] = 0.0;
        let pre = Preprocessor::new(PreprocessConfig::default()).unwrap();
        let (cleaned, report) = pre.clean_with_report(&f).unwrap();
        assert_eq!(cleaned.len(), 29);
        assert_eq!(report.zero_volume_removed["A"], 1);
    }

    #[test]
    fn test_short_symbol_removed() {
        let f = frame(&[("LONG", 40), ("SHORT", 15)], |i| 50.0 + i as f64);
        let pre = Preprocessor::new(PreprocessConfig::default()).unwrap();
        let (cleaned, report) = pre.clean_with_report(&f).unwrap();
        assert_eq!(cleaned.distinct_symbols(), vec!["LONG".to_string()]);
        assert_eq!(report.symbols_removed["SHORT"], 15);
    }

    #[test]
    fn test_point_only_mode_leaves_other_values() {
        let spike_at = 70;
        let wobble = |i: usize| 100.0 + (i % 5) as f64;
        let mut f = frame(&[("A", 90)], wobble);
        f.float_mut(CLOSE).unwrap()[spike_at] = 5000.0;
        let config = PreprocessConfig {
            winsorize_mode: WinsorizeMode::PointOnly,
            ..Default::default()
        };
        let (cleaned, report) = Preprocessor::new(config)
            .unwrap()
            .clean_with_report(&f)
            .unwrap();

        assert_eq!(report.outlier_count("A", CLOSE), 1);
        let close = cleaned.float(CLOSE).unwrap();
        assert_eq!(close[spike_at], 104.0);
        for (i, v) in close.iter().enumerate().filter(|(i, _)| *i != spike_at) {
            assert_eq!(*v, wobble(i));
        }
    }

    #[test]
    fn test_detect_outliers_needs_min_periods() {
        let mut values = vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0, 1.0, 2.0];
        values.push(1000.0);
        let flags = detect_outliers(&values, 60, 0.5);
        assert!(flags.iter().all(|f| !f));
    }

    #[test]
    fn test_lone_spike_clears_default_threshold() {
        let mut values: Vec<f64> = (0..80).map(|i| 100.0 + (i % 5) as f64).collect();
        values[70] = 5000.0;
        let flags = detect_outliers(&values, 60, 10.0);
        assert!(flags[70]);
        assert_eq!(flags.iter().filter(|f| **f).count(), 1);
    }

    #[test]
    fn test_flat_window_flags_nothing() {
        let mut values = vec![50.0; 30];
        values[25] = 50.5;
        assert!(detect_outliers(&values, 20, 10.0).iter().all(|f| !f));
    }

    #[test]
    fn test_ohlc_violation_count() {
        let n = count_ohlc_violations(&[10.0, 10.0], &[9.0, 11.0], &[8.0, 9.0], &[10.0, 10.5]);
        assert_eq!(n, 1);
    }

    #[test]
    fn test_stats_between() {
        let before = frame(&[("A", 30), ("B", 10)], |i| 10.0 + i as f64);
        let pre = Preprocessor::new(PreprocessConfig::default()).unwrap();
        let after = pre.clean(&before).unwrap();
        let stats = PreprocessStats::between(&before, &after);
        assert_eq!(stats.records_removed, 10);
        assert_eq!(stats.symbols_removed, 1);
        assert!((stats.removal_rate - 0.25).abs() < 1e-12);
    }
}
