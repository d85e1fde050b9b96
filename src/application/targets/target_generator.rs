use crate::application::market_data::statistical_features::{
    calculate_kurtosis, calculate_skewness,
};
use crate::config::TargetConfig;
use crate::domain::dataset::frame::Frame;
use crate::domain::errors::{PipelineError, Result};
use crate::domain::market::ohlcv::{CLOSE, price_basis};
use crate::domain::ml::feature_registry::{NEXT_RET, Y_UP};
use serde::Serialize;
use statrs::statistics::{Data, Distribution};
use std::collections::BTreeMap;
use tracing::{Span, debug, info, info_span, warn};

const STAGE: &str = "target generation";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReturnStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub skewness: Option<f64>,
    pub kurtosis: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DirectionStats {
    pub up_count: usize,
    pub down_count: usize,
    pub up_rate: f64,
    /// |up_rate - 0.5|
    pub class_balance_deviation: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SymbolTargetStats {
    pub rows: usize,
    pub up_rate: f64,
    pub mean_return: f64,
}

/// Summary of a labelled frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TargetSummary {
    pub total_records: usize,
    pub symbols: usize,
    pub returns: ReturnStats,
    pub direction: DirectionStats,
    pub by_symbol: BTreeMap<String, SymbolTargetStats>,
}

impl TargetSummary {
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let next_ret = frame.require_float(STAGE, NEXT_RET)?;
        let y_up = frame.require_float(STAGE, Y_UP)?;

        let returns: Vec<f64> = next_ret.iter().copied().filter(|v| v.is_finite()).collect();
        let labels: Vec<f64> = y_up.iter().copied().filter(|v| v.is_finite()).collect();
        let up_count = labels.iter().filter(|v| **v == 1.0).count();
        let up_rate = ratio(up_count, labels.len());

        let mut per_symbol: BTreeMap<String, (usize, usize, f64, usize)> = BTreeMap::new();
        for (i, symbol) in frame.symbols().iter().enumerate() {
            let entry = per_symbol.entry(symbol.clone()).or_default();
            entry.0 += 1;
            if y_up[i] == 1.0 {
                entry.1 += 1;
            }
            if next_ret[i].is_finite() {
                entry.2 += next_ret[i];
                entry.3 += 1;
            }
        }

        Ok(Self {
            total_records: frame.len(),
            symbols: per_symbol.len(),
            returns: return_stats(&returns),
            direction: DirectionStats {
                up_count,
                down_count: labels.len() - up_count,
                up_rate,
                class_balance_deviation: (up_rate - 0.5).abs(),
            },
            by_symbol: per_symbol
                .into_iter()
                .map(|(symbol, (rows, ups, sum, finite))| {
                    (
                        symbol,
                        SymbolTargetStats {
                            rows,
                            up_rate: ratio(ups, rows),
                            mean_return: if finite == 0 {
                                f64::NAN
                            } else {
                                sum / finite as f64
                            },
                        },
                    )
                })
                .collect(),
        })
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        f64::NAN
    } else {
        part as f64 / whole as f64
    }
}

fn return_stats(returns: &[f64]) -> ReturnStats {
    if returns.is_empty() {
        return ReturnStats {
            mean: f64::NAN,
            std: f64::NAN,
            min: f64::NAN,
            max: f64::NAN,
            skewness: None,
            kurtosis: None,
        };
    }
    let data = Data::new(returns.to_vec());
    ReturnStats {
        mean: data.mean().unwrap_or(f64::NAN),
        std: data.std_dev().unwrap_or(f64::NAN),
        min: returns.iter().copied().fold(f64::INFINITY, f64::min),
        max: returns.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        skewness: calculate_skewness(returns),
        kurtosis: calculate_kurtosis(returns),
    }
}

/// Attaches the next-day return and the direction label to every row.
pub struct TargetGenerator {
    config: TargetConfig,
    span: Span,
}

impl TargetGenerator {
    pub fn new(config: TargetConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            span: info_span!("target_generator"),
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    pub fn make_targets(&self, frame: &Frame) -> Result<Frame> {
        self.make_targets_with_margin(frame, self.config.margin_pct)
    }

    /// `y_up = 1` when `next_ret > margin_pct`. Rows without a next return
    /// carry a missing label and are dropped when `remove_incomplete_days`.
    pub fn make_targets_with_margin(&self, frame: &Frame, margin_pct: f64) -> Result<Frame> {
        let _guard = self.span.enter();
        frame.require_columns(STAGE, &[CLOSE])?;
        if !margin_pct.is_finite() {
            return Err(PipelineError::Config(format!(
                "margin_pct must be finite, got {}",
                margin_pct
            )));
        }
        info!("Generating targets for {} records", frame.len());

        let (lo, hi) = (
            self.config.min_return_threshold,
            self.config.max_return_threshold,
        );
        let mut clipped_low = 0usize;
        let mut clipped_high = 0usize;
        let mut parts = Vec::new();

        for (symbol, mut part) in frame.partition_by_symbol() {
            let basis = price_basis(&part);
            debug!("{}: next returns on {}", symbol, basis);
            let price = part.require_float(STAGE, basis)?;
            let mut next_ret = next_returns(price);
            for r in next_ret.iter_mut().filter(|r| r.is_finite()) {
                if *r < lo {
                    clipped_low += 1;
                    *r = lo;
                } else if *r > hi {
                    clipped_high += 1;
                    *r = hi;
                }
            }
            let y_up: Vec<f64> = next_ret
                .iter()
                .map(|r| {
                    if r.is_nan() {
                        f64::NAN
                    } else if *r > margin_pct {
                        1.0
                    } else {
                        0.0
                    }
                })
                .collect();
            part.insert_float(NEXT_RET, next_ret)?;
            part.insert_float(Y_UP, y_up)?;
            parts.push(part);
        }

        if clipped_low > 0 || clipped_high > 0 {
            warn!(
                "Clipped next-day returns: {} below {}, {} above {}",
                clipped_low, lo, clipped_high, hi
            );
        }

        let mut labelled = Frame::concat(parts)?.sorted_by_time_symbol();
        let before = labelled.len();
        if self.config.remove_incomplete_days {
            let keep: Vec<bool> = labelled
                .require_float(STAGE, NEXT_RET)?
                .iter()
                .map(|r| !r.is_nan())
                .collect();
            labelled = labelled.filter(&keep);
        }

        let summary = TargetSummary::from_frame(&labelled)?;
        info!(
            "Targets generated: {} -> {} records, return mean {:.5} std {:.5} min {:.5} max {:.5}, up-rate {:.3}",
            before,
            labelled.len(),
            summary.returns.mean,
            summary.returns.std,
            summary.returns.min,
            summary.returns.max,
            summary.direction.up_rate
        );
        for (symbol, stats) in &summary.by_symbol {
            info!(
                "  {}: {} rows, up-rate {:.3}, mean return {:.5}",
                symbol, stats.rows, stats.up_rate, stats.mean_return
            );
        }
        Ok(labelled)
    }
}

/// `price[t + 1] / price[t] - 1`, missing on the last row.
fn next_returns(price: &[f64]) -> Vec<f64> {
    (0..price.len())
        .map(|t| match price.get(t + 1) {
            Some(next) if price[t].is_finite() && next.is_finite() && price[t] != 0.0 => {
                next / price[t] - 1.0
            }
            _ => f64::NAN,
        })
        .collect()
}

/// Sanity check on a labelled frame. Returns false on missing targets or a
/// non-binary label; extreme returns only warn.
pub fn validate_targets(frame: &Frame) -> bool {
    let (Some(next_ret), Some(y_up)) = (frame.float(NEXT_RET), frame.float(Y_UP)) else {
        warn!("Target columns missing");
        return false;
    };
    let missing = next_ret.iter().chain(y_up).filter(|v| v.is_nan()).count();
    if missing > 0 {
        warn!("{} missing target values", missing);
        return false;
    }
    if y_up.iter().any(|v| *v != 0.0 && *v != 1.0) {
        warn!("y_up contains values other than 0 and 1");
        return false;
    }
    let extreme = next_ret.iter().filter(|r| r.abs() > 1.0).count();
    if extreme > 0 {
        warn!("{} next-day returns exceed 100%", extreme);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::ohlcv::ADJ_CLOSE;
    use chrono::{Duration, FixedOffset, NaiveDate, TimeZone};

    fn frame(closes: &[(&str, Vec<f64>)]) -> Frame {
        let tz = FixedOffset::east_opt(0).unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut ts = Vec::new();
        let mut syms = Vec::new();
        let mut close = Vec::new();
        for (symbol, values) in closes {
            for (d, v) in values.iter().enumerate() {
                let date = start + Duration::days(d as i64);
                ts.push(tz.from_local_datetime(&date.and_hms_opt(0, 0, 0).unwrap()).unwrap());
                syms.push(symbol.to_string());
                close.push(*v);
            }
        }
        let mut f = Frame::new(ts, syms).unwrap();
        f.insert_float(CLOSE, close).unwrap();
        f.sorted_by_time_symbol()
    }

    #[test]
    fn test_next_ret_and_label() {
        let generator = TargetGenerator::new(TargetConfig::default()).unwrap();
        let out = generator
            .make_targets(&frame(&[("A", vec![100.0, 110.0, 99.0])]))
            .unwrap();
        assert_eq!(out.len(), 2);
        let r = out.float(NEXT_RET).unwrap();
        assert!((r[0] - 0.1).abs() < 1e-12);
        assert!((r[1] - (-0.1)).abs() < 1e-12);
        assert_eq!(out.float(Y_UP).unwrap(), &[1.0, 0.0]);
        assert!(validate_targets(&out));
    }

    #[test]
    fn test_returns_are_clipped() {
        let generator = TargetGenerator::new(TargetConfig::default()).unwrap();
        let out = generator
            .make_targets(&frame(&[("A", vec![10.0, 30.0, 3.0])]))
            .unwrap();
        assert_eq!(out.float(NEXT_RET).unwrap(), &[0.5, -0.5]);
    }

    #[test]
    fn test_margin_override() {
        let generator = TargetGenerator::new(TargetConfig::default()).unwrap();
        let input = frame(&[("A", vec![100.0, 101.0, 103.0])]);
        let out = generator.make_targets_with_margin(&input, 0.015).unwrap();
        assert_eq!(out.float(Y_UP).unwrap(), &[0.0, 1.0]);
    }

    #[test]
    fn test_keep_incomplete_days() {
        let config = TargetConfig {
            remove_incomplete_days: false,
            ..Default::default()
        };
        let generator = TargetGenerator::new(config).unwrap();
        let out = generator
            .make_targets(&frame(&[("A", vec![1.0, 2.0]), ("B", vec![3.0, 3.0])]))
            .unwrap();
        assert_eq!(out.len(), 4);
        assert!(!validate_targets(&out));
    }

    #[test]
    fn test_missing_close_is_schema_error() {
        let generator = TargetGenerator::new(TargetConfig::default()).unwrap();
        let mut input = frame(&[("A", vec![1.0, 2.0])]);
        input.remove_column(CLOSE);
        assert!(matches!(
            generator.make_targets(&input),
            Err(PipelineError::Schema { .. })
        ));
    }

    #[test]
    fn test_symbol_without_adjusted_close_uses_close() {
        let generator = TargetGenerator::new(TargetConfig::default()).unwrap();
        let mut input = frame(&[("A", vec![10.0, 20.0, 20.0]), ("B", vec![4.0, 5.0, 5.0])]);
        // A's adjusted series stays flat while close doubles; B never had one
        let adj: Vec<f64> = input
            .symbols()
            .iter()
            .zip(input.float(CLOSE).unwrap())
            .map(|(s, c)| if s == "A" { (c / 10.0).min(1.0) } else { f64::NAN })
            .collect();
        input.insert_float(ADJ_CLOSE, adj).unwrap();

        let out = generator.make_targets(&input).unwrap();
        assert_eq!(out.len(), 4);
        let ret = out.float(NEXT_RET).unwrap();
        let by_symbol: Vec<(&String, f64)> = out.symbols().iter().zip(ret.iter().copied()).collect();
        assert!(by_symbol.iter().all(|(_, r)| r.is_finite()));
        let b_first = by_symbol.iter().find(|(s, _)| *s == "B").unwrap().1;
        assert!((b_first - 0.25).abs() < 1e-12);
        let a_first = by_symbol.iter().find(|(s, _)| *s == "A").unwrap().1;
        assert!(a_first.abs() < 1e-12);
    }

    #[test]
    fn test_summary_per_symbol() {
        let generator = TargetGenerator::new(TargetConfig::default()).unwrap();
        let out = generator
            .make_targets(&frame(&[
                ("A", vec![1.0, 2.0, 3.0]),
                ("B", vec![4.0, 3.0, 2.0]),
            ]))
            .unwrap();
        let summary = TargetSummary::from_frame(&out).unwrap();
        assert_eq!(summary.total_records, 4);
        assert_eq!(summary.direction.up_count, 2);
        assert!((summary.direction.class_balance_deviation).abs() < 1e-12);
        assert_eq!(summary.by_symbol["A"].up_rate, 1.0);
        assert_eq!(summary.by_symbol["B"].up_rate, 0.0);
    }
}
