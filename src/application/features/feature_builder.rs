use crate::application::features::indicators::{self, Bar};
use crate::application::market_data::statistical_features::{pct_change, rolling_mean};
use crate::config::FeatureConfig;
use crate::domain::dataset::frame::Frame;
use crate::domain::errors::{PipelineError, Result};
use crate::domain::market::ohlcv::{CLOSE, HIGH, LOW, OPEN, REQUIRED_VALUE_COLUMNS, VOLUME, price_basis};
use crate::domain::ml::feature_registry::CONTAINS_LEADING_NAN;
use chrono::Datelike;
use rayon::prelude::*;
use std::collections::HashSet;
use tracing::{Span, debug, info, info_span, warn};

const STAGE: &str = "feature building";

/// Named feature columns for one symbol, in output order.
type FeatureColumns = Vec<(String, Vec<f64>)>;

/// Derives point-in-time technical and calendar features per symbol.
pub struct FeatureBuilder {
    config: FeatureConfig,
    span: Span,
}

impl FeatureBuilder {
    pub fn new(config: FeatureConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            span: info_span!("feature_builder"),
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Returns the frame with feature columns appended plus the ordered list
    /// of feature names. Rows are never dropped; warm-up rows carry
    /// `contains_leading_nan = true`.
    pub fn build(&self, frame: &Frame) -> Result<(Frame, Vec<String>)> {
        let _guard = self.span.enter();
        frame.require_columns(STAGE, REQUIRED_VALUE_COLUMNS)?;
        if frame.is_empty() {
            return Err(PipelineError::Validation(
                "feature building needs at least one row".to_string(),
            ));
        }
        info!(
            "Building features for {} records ({} symbols)",
            frame.len(),
            frame.distinct_symbols().len()
        );

        let span = self.span.clone();
        let parts: Vec<(Frame, Vec<String>)> = frame
            .partition_by_symbol()
            .into_par_iter()
            .map(|(symbol, part)| {
                let _guard = span.enter();
                self.build_symbol(&symbol, part)
            })
            .collect::<Result<_>>()?;

        let names = parts
            .first()
            .map(|(_, names)| names.clone())
            .unwrap_or_default();
        let combined = Frame::concat(parts.into_iter().map(|(f, _)| f).collect())?;
        let combined = combined.sorted_by_time_symbol();

        let flagged = combined
            .flag(CONTAINS_LEADING_NAN)
            .map_or(0, |f| f.iter().filter(|v| **v).count());
        info!(
            "Feature building completed: {} features, {} warm-up rows flagged",
            names.len(),
            flagged
        );
        Ok((combined, names))
    }

    fn build_symbol(&self, symbol: &str, mut part: Frame) -> Result<(Frame, Vec<String>)> {
        let basis = price_basis(&part);
        let price = part.require_float(STAGE, basis)?.to_vec();
        let bars = bars_of(&part)?;
        let volume: Vec<f64> = bars.iter().map(|b| b.volume).collect();
        let close: Vec<f64> = bars.iter().map(|b| b.close).collect();

        let mut columns: FeatureColumns = Vec::new();
        self.trend_features(&price, &mut columns)?;
        self.volatility_features(&price, &close, &bars, &mut columns)?;
        self.volume_features(&price, &volume, &mut columns);
        self.momentum_features(&price, &bars, &mut columns)?;
        self.extended_features(symbol, &bars, &mut columns);
        seasonality_features(&part, &mut columns);

        let leading = leading_nan_mask(&columns, part.len());
        debug!(
            "{}: {} rows on {}, {} warm-up rows",
            symbol,
            part.len(),
            basis,
            leading.iter().filter(|v| **v).count()
        );

        let mut names = Vec::with_capacity(columns.len());
        for (name, values) in columns {
            part.insert_float(name.clone(), values)?;
            names.push(name);
        }
        part.insert_flag(CONTAINS_LEADING_NAN, leading)?;
        Ok((part, names))
    }

    fn trend_features(&self, price: &[f64], out: &mut FeatureColumns) -> Result<()> {
        for w in &self.config.sma_windows {
            out.push((format!("sma_{}", w), indicators::sma(price, *w)?));
        }
        for w in &self.config.ema_windows {
            out.push((format!("ema_{}", w), indicators::ema(price, *w)?));
        }
        let w = self.config.slope_window;
        let slope = indicators::slope(price, w);
        let slope_pct = ratio(&slope, price);
        out.push((format!("slope_{}", w), slope));
        out.push((format!("slope_pct_{}", w), slope_pct));
        Ok(())
    }

    fn volatility_features(
        &self,
        price: &[f64],
        close: &[f64],
        bars: &[Bar],
        out: &mut FeatureColumns,
    ) -> Result<()> {
        let w = self.config.atr_window;
        let atr = indicators::atr(bars, w)?;
        let atr_pct = ratio(&atr, close);
        out.push((format!("atr_{}", w), atr));
        out.push((format!("atr_pct_{}", w), atr_pct));

        let w = self.config.stdev_window;
        out.push((format!("stdev_{}", w), indicators::return_stdev(price, w)));

        let w = self.config.bollinger_window;
        let bb = indicators::bollinger(price, w, self.config.bollinger_std)?;
        let width: Vec<f64> = (0..price.len())
            .map(|i| (bb.upper[i] - bb.lower[i]) / bb.middle[i] * 100.0)
            .map(finite_or_nan)
            .collect();
        let pband: Vec<f64> = (0..price.len())
            .map(|i| (price[i] - bb.lower[i]) / (bb.upper[i] - bb.lower[i]))
            .map(finite_or_nan)
            .collect();
        out.push((format!("bb_upper_{}", w), bb.upper));
        out.push((format!("bb_lower_{}", w), bb.lower));
        out.push((format!("bb_middle_{}", w), bb.middle));
        out.push((format!("bb_width_{}", w), width));
        out.push((format!("bb_pband_{}", w), pband));
        Ok(())
    }

    fn volume_features(&self, price: &[f64], volume: &[f64], out: &mut FeatureColumns) {
        let w = self.config.volume_ratio_window;
        let vol_ratio = ratio(volume, &rolling_mean(volume, w, 1));
        let turnover: Vec<f64> = price.iter().zip(volume).map(|(p, v)| p * v).collect();
        let tov_ratio = ratio(&turnover, &rolling_mean(&turnover, w, 1));
        out.push((format!("vol_ratio_{}", w), vol_ratio));
        out.push((format!("tov_ratio_{}", w), tov_ratio));
        out.push(("vpt".to_string(), indicators::vpt(price, volume)));
        out.push(("obv".to_string(), indicators::obv(price, volume)));
    }

    fn momentum_features(&self, price: &[f64], bars: &[Bar], out: &mut FeatureColumns) -> Result<()> {
        for k in &self.config.return_windows {
            out.push((format!("ret_{}d", k), pct_change(price, *k)));
        }
        let w = self.config.rsi_window;
        out.push((format!("rsi_{}", w), indicators::rsi(price, w)?));

        let (fast, slow, signal) = self.config.macd_windows;
        let macd = indicators::macd(price, fast, slow, signal)?;
        out.push(("macd".to_string(), macd.macd));
        out.push(("macd_signal".to_string(), macd.signal));
        out.push(("macd_hist".to_string(), macd.histogram));

        let (k, d) = indicators::stochastic(bars, self.config.stoch_window, self.config.stoch_smooth)?;
        out.push(("stoch_k".to_string(), k));
        out.push(("stoch_d".to_string(), d));
        Ok(())
    }

    /// Williams %R, CCI and ADX. Short histories and per-indicator failures
    /// leave the affected columns missing instead of failing the build.
    fn extended_features(&self, symbol: &str, bars: &[Bar], out: &mut FeatureColumns) {
        let n = bars.len();
        let missing = || vec![f64::NAN; n];
        let enough = n >= self.config.extended_min_periods;
        if !enough {
            debug!(
                "{}: {} rows < {}, extended indicators left missing",
                symbol, n, self.config.extended_min_periods
            );
        }

        let williams = if enough {
            indicators::williams_r(bars, self.config.williams_window).unwrap_or_else(|e| {
                warn!("Williams %R failed for {}: {}", symbol, e);
                missing()
            })
        } else {
            missing()
        };
        out.push(("williams_r".to_string(), williams));

        let cci = if enough {
            indicators::cci(bars, self.config.cci_window, self.config.cci_constant)
                .unwrap_or_else(|e| {
                    warn!("CCI failed for {}: {}", symbol, e);
                    missing()
                })
        } else {
            missing()
        };
        out.push(("cci".to_string(), cci));

        let (adx, pos, neg) = if enough {
            match indicators::directional(bars, self.config.adx_window) {
                Ok(series) => (series.adx, series.plus_di, series.minus_di),
                Err(e) => {
                    warn!("ADX failed for {}: {}", symbol, e);
                    (missing(), missing(), missing())
                }
            }
        } else {
            (missing(), missing(), missing())
        };
        out.push(("adx".to_string(), adx));
        out.push(("adx_pos".to_string(), pos));
        out.push(("adx_neg".to_string(), neg));
    }
}

fn bars_of(part: &Frame) -> Result<Vec<Bar>> {
    let open = part.require_float(STAGE, OPEN)?;
    let high = part.require_float(STAGE, HIGH)?;
    let low = part.require_float(STAGE, LOW)?;
    let close = part.require_float(STAGE, CLOSE)?;
    let volume = part.require_float(STAGE, VOLUME)?;
    Ok((0..part.len())
        .map(|i| Bar {
            open: open[i],
            high: high[i],
            low: low[i],
            close: close[i],
            volume: volume[i],
        })
        .collect())
}

fn seasonality_features(part: &Frame, out: &mut FeatureColumns) {
    let dates: Vec<_> = part.timestamps().iter().map(|t| t.date_naive()).collect();
    let present: HashSet<_> = dates.iter().copied().collect();
    let adjacent = |day: Option<chrono::NaiveDate>| {
        if day.is_some_and(|d| present.contains(&d)) {
            1.0
        } else {
            0.0
        }
    };

    out.push((
        "dow".to_string(),
        dates
            .iter()
            .map(|d| f64::from(d.weekday().num_days_from_monday()))
            .collect(),
    ));
    out.push((
        "day_of_month".to_string(),
        dates.iter().map(|d| f64::from(d.day())).collect(),
    ));
    out.push((
        "prev_day".to_string(),
        dates.iter().map(|d| adjacent(d.pred_opt())).collect(),
    ));
    out.push((
        "next_day".to_string(),
        dates.iter().map(|d| adjacent(d.succ_opt())).collect(),
    ));
}

/// Row `i` is flagged when some feature has been missing at every row up to
/// and including `i`.
fn leading_nan_mask(columns: &FeatureColumns, len: usize) -> Vec<bool> {
    let mut mask = vec![false; len];
    for (_, values) in columns {
        for (flag, value) in mask.iter_mut().zip(values) {
            if !value.is_nan() {
                break;
            }
            *flag = true;
        }
    }
    mask
}

fn ratio(numerator: &[f64], denominator: &[f64]) -> Vec<f64> {
    numerator
        .iter()
        .zip(denominator)
        .map(|(n, d)| finite_or_nan(n / d))
        .collect()
}

fn finite_or_nan(value: f64) -> f64 {
    if value.is_finite() { value } else { f64::NAN }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::ohlcv::ADJ_CLOSE;
    use chrono::{Duration, FixedOffset, NaiveDate, TimeZone};

    fn synthetic(symbols: &[&str], days: usize) -> Frame {
        let tz = FixedOffset::east_opt(9 * 3600).unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut timestamps = Vec::new();
        let mut syms = Vec::new();
        let mut close = Vec::new();
        for s in symbols {
            for d in 0..days {
                let date = start + Duration::days(d as i64);
                timestamps.push(
                    tz.from_local_datetime(&date.and_hms_opt(0, 0, 0).unwrap())
                        .unwrap(),
                );
                syms.push(s.to_string());
                close.push(100.0 + d as f64);
            }
        }
        let mut frame = Frame::new(timestamps, syms).unwrap();
        frame
            .insert_float(OPEN, close.iter().map(|c| c - 0.5).collect())
            .unwrap();
        frame
            .insert_float(HIGH, close.iter().map(|c| c + 1.0).collect())
            .unwrap();
        frame
            .insert_float(LOW, close.iter().map(|c| c - 1.0).collect())
            .unwrap();
        frame.insert_float(CLOSE, close.clone()).unwrap();
        frame.insert_float(VOLUME, vec![1000.0; close.len()]).unwrap();
        frame.sorted_by_time_symbol()
    }

    #[test]
    fn test_build_adds_named_features() {
        let builder = FeatureBuilder::new(FeatureConfig::default()).unwrap();
        let (frame, names) = builder.build(&synthetic(&["A", "B"], 80)).unwrap();
        assert_eq!(frame.len(), 160);
        for name in ["sma_5", "ema_21", "atr_pct_14", "bb_pband_20", "ret_1d", "adx", "next_day"] {
            assert!(names.contains(&name.to_string()), "missing {name}");
            assert!(frame.float(name).is_some());
        }
        assert!(frame.flag(CONTAINS_LEADING_NAN).is_some());
    }

    #[test]
    fn test_sma_value_on_linear_trend() {
        let builder = FeatureBuilder::new(FeatureConfig::default()).unwrap();
        let (frame, _) = builder.build(&synthetic(&["A"], 30)).unwrap();
        let sma = frame.float("sma_5").unwrap();
        // close on day 10 is 110, mean of 106..=110
        assert!((sma[10] - 108.0).abs() < 1e-9);
        assert!(sma[3].is_nan());
    }

    #[test]
    fn test_leading_nan_flag_clears_after_warmup() {
        let builder = FeatureBuilder::new(FeatureConfig::default()).unwrap();
        let (frame, _) = builder.build(&synthetic(&["A"], 80)).unwrap();
        let flags = frame.flag(CONTAINS_LEADING_NAN).unwrap();
        assert!(flags[0]);
        // sma_50 is the longest warm-up
        assert!(flags[48]);
        assert!(!flags[79]);
    }

    #[test]
    fn test_short_history_leaves_extended_missing() {
        let builder = FeatureBuilder::new(FeatureConfig::default()).unwrap();
        let (frame, _) = builder.build(&synthetic(&["A"], 10)).unwrap();
        for name in ["williams_r", "cci", "adx", "adx_pos", "adx_neg"] {
            assert!(frame.float(name).unwrap().iter().all(|v| v.is_nan()));
        }
    }

    #[test]
    fn test_seasonality_adjacency() {
        let builder = FeatureBuilder::new(FeatureConfig::default()).unwrap();
        let (frame, _) = builder.build(&synthetic(&["A"], 3)).unwrap();
        assert_eq!(frame.float("prev_day").unwrap(), &[0.0, 1.0, 1.0]);
        assert_eq!(frame.float("next_day").unwrap(), &[1.0, 1.0, 0.0]);
        // 2024-01-01 was a Monday
        assert_eq!(frame.float("dow").unwrap(), &[0.0, 1.0, 2.0]);
    }

    fn same(a: &[f64], b: &[f64]) -> bool {
        a.iter()
            .zip(b)
            .all(|(x, y)| (x.is_nan() && y.is_nan()) || (x - y).abs() < 1e-9)
    }

    #[test]
    fn test_missing_close_does_not_poison_later_rows() {
        let builder = FeatureBuilder::new(FeatureConfig::default()).unwrap();
        let mut input = synthetic(&["A"], 120);
        let mut close = input.float(CLOSE).unwrap().to_vec();
        close[30] = f64::NAN;
        input.insert_float(CLOSE, close).unwrap();

        let (frame, names) = builder.build(&input).unwrap();
        let still_missing: Vec<&String> = names
            .iter()
            .filter(|n| frame.float(n).unwrap()[110].is_nan())
            .collect();
        assert!(still_missing.is_empty(), "{:?}", still_missing);
        assert!(frame.float("sma_5").unwrap()[30].is_nan());
        assert!((frame.float("sma_5").unwrap()[110] - 208.0).abs() < 1e-9);
    }

    #[test]
    fn test_volume_features_follow_adjusted_price() {
        let builder = FeatureBuilder::new(FeatureConfig::default()).unwrap();
        let mut input = synthetic(&["A"], 80);
        let close = input.float(CLOSE).unwrap().to_vec();
        input.insert_float(ADJ_CLOSE, close.clone()).unwrap();
        let (before, _) = builder.build(&input).unwrap();

        let doubled: Vec<f64> = close
            .iter()
            .enumerate()
            .map(|(i, c)| if i >= 60 { c * 2.0 } else { *c })
            .collect();
        input.insert_float(CLOSE, doubled).unwrap();
        let (after, _) = builder.build(&input).unwrap();

        for name in ["tov_ratio_20", "obv", "vpt", "vol_ratio_20", "sma_5", "rsi_14", "bb_pband_20"] {
            assert!(
                same(before.float(name).unwrap(), after.float(name).unwrap()),
                "{name} moved with raw close"
            );
        }
    }

    #[test]
    fn test_price_basis_is_chosen_per_symbol() {
        let builder = FeatureBuilder::new(FeatureConfig::default()).unwrap();
        let mut input = synthetic(&["A", "B"], 60);
        let adj: Vec<f64> = input
            .symbols()
            .iter()
            .zip(input.float(CLOSE).unwrap())
            .map(|(s, c)| if s == "A" { *c } else { f64::NAN })
            .collect();
        input.insert_float(ADJ_CLOSE, adj).unwrap();

        let (frame, _) = builder.build(&input).unwrap();
        let sma = frame.float("sma_5").unwrap();
        for (i, symbol) in frame.symbols().iter().enumerate().rev().take(2) {
            assert!(sma[i].is_finite(), "{symbol} lost its price basis");
        }
    }

    #[test]
    fn test_missing_columns_is_schema_error() {
        let builder = FeatureBuilder::new(FeatureConfig::default()).unwrap();
        let mut frame = synthetic(&["A"], 5);
        frame.remove_column(VOLUME);
        assert!(matches!(
            builder.build(&frame),
            Err(PipelineError::Schema { .. })
        ));
    }
}
