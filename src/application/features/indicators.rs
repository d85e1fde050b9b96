//! Point-in-time technical indicators over one symbol's series.
//!
//! Every function reads `values[..=i]` only to produce output `i`. Outputs
//! inside an indicator's warm-up are NaN, so the leading-NaN flag downstream
//! sees exactly which rows are not yet meaningful. A missing input blanks
//! windowed outputs until it leaves the window; smoothed indicators skip it.

use crate::application::market_data::statistical_features::{pct_change, rolling_std};
use crate::domain::errors::{PipelineError, Result};
use ta::Next;
use ta::indicators::{
    AverageTrueRange, BollingerBands, ExponentialMovingAverage, FastStochastic,
    MovingAverageConvergenceDivergence, OnBalanceVolume, RelativeStrengthIndex,
    SimpleMovingAverage,
};

/// One OHLCV bar, fed to the `ta` indicators by reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl ta::Open for Bar {
    fn open(&self) -> f64 {
        self.open
    }
}

impl ta::High for Bar {
    fn high(&self) -> f64 {
        self.high
    }
}

impl ta::Low for Bar {
    fn low(&self) -> f64 {
        self.low
    }
}

impl ta::Close for Bar {
    fn close(&self) -> f64 {
        self.close
    }
}

impl ta::Volume for Bar {
    fn volume(&self) -> f64 {
        self.volume
    }
}

impl Bar {
    /// High, low and close are all usable.
    pub fn has_prices(&self) -> bool {
        self.high.is_finite() && self.low.is_finite() && self.close.is_finite()
    }
}

fn indicator_error(name: &str, err: impl std::fmt::Debug) -> PipelineError {
    PipelineError::Config(format!("{} parameters rejected: {:?}", name, err))
}

/// Where a series has unusable inputs.
///
/// The `ta` indicators carry running state that one NaN poisons for good, so
/// only usable inputs are fed to them. Outputs are then blanked while the
/// indicator is warming up on usable inputs, and while a gap is still inside
/// the trailing `span` rows.
struct Gaps {
    /// Usable inputs in `0..=i`.
    seen: Vec<usize>,
    /// Most recent unusable row in `0..=i`.
    last_gap: Vec<Option<usize>>,
}

impl Gaps {
    fn new(usable: impl Iterator<Item = bool>) -> Self {
        let mut seen = Vec::new();
        let mut last_gap = Vec::new();
        let (mut count, mut gap) = (0, None);
        for (i, ok) in usable.enumerate() {
            if ok {
                count += 1;
            } else {
                gap = Some(i);
            }
            seen.push(count);
            last_gap.push(gap);
        }
        Self { seen, last_gap }
    }

    fn of_values(values: &[f64]) -> Self {
        Self::new(values.iter().map(|v| v.is_finite()))
    }

    fn of_bars(bars: &[Bar]) -> Self {
        Self::new(bars.iter().map(Bar::has_prices))
    }

    fn usable(&self, i: usize) -> bool {
        self.last_gap[i] != Some(i)
    }

    /// Runs `step` on usable inputs only; gap rows come out NaN.
    fn feed<T>(&self, inputs: &[T], mut step: impl FnMut(&T) -> f64) -> Vec<f64> {
        inputs
            .iter()
            .enumerate()
            .map(|(i, x)| if self.usable(i) { step(x) } else { f64::NAN })
            .collect()
    }

    /// Blanks output `i` while at most `warmup` usable inputs have been seen
    /// or while a gap lies within the last `span` rows.
    fn mask(&self, mut values: Vec<f64>, warmup: usize, span: usize) -> Vec<f64> {
        let span = span.max(1);
        for (i, v) in values.iter_mut().enumerate() {
            let gapped = self.last_gap[i].is_some_and(|g| i - g < span);
            if self.seen[i] <= warmup || gapped {
                *v = f64::NAN;
            }
        }
        values
    }
}

pub fn sma(values: &[f64], window: usize) -> Result<Vec<f64>> {
    let mut ind = SimpleMovingAverage::new(window).map_err(|e| indicator_error("sma", e))?;
    let gaps = Gaps::of_values(values);
    let out = gaps.feed(values, |v| ind.next(*v));
    Ok(gaps.mask(out, window - 1, window))
}

/// Exponential smoothing carries on across gaps; only gap rows are missing.
pub fn ema(values: &[f64], window: usize) -> Result<Vec<f64>> {
    let mut ind = ExponentialMovingAverage::new(window).map_err(|e| indicator_error("ema", e))?;
    let gaps = Gaps::of_values(values);
    let out = gaps.feed(values, |v| ind.next(*v));
    Ok(gaps.mask(out, window - 1, 1))
}

pub fn rsi(values: &[f64], window: usize) -> Result<Vec<f64>> {
    let mut ind = RelativeStrengthIndex::new(window).map_err(|e| indicator_error("rsi", e))?;
    let gaps = Gaps::of_values(values);
    let out = gaps.feed(values, |v| ind.next(*v));
    Ok(gaps.mask(out, window, 1))
}

pub struct MacdSeries {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> Result<MacdSeries> {
    let mut ind = MovingAverageConvergenceDivergence::new(fast, slow, signal)
        .map_err(|e| indicator_error("macd", e))?;
    let gaps = Gaps::of_values(values);
    let mut series = MacdSeries {
        macd: Vec::with_capacity(values.len()),
        signal: Vec::with_capacity(values.len()),
        histogram: Vec::with_capacity(values.len()),
    };
    for (i, v) in values.iter().enumerate() {
        if !gaps.usable(i) {
            series.macd.push(f64::NAN);
            series.signal.push(f64::NAN);
            series.histogram.push(f64::NAN);
            continue;
        }
        let out = ind.next(*v);
        series.macd.push(out.macd);
        series.signal.push(out.signal);
        series.histogram.push(out.histogram);
    }
    let signal_warmup = slow + signal - 2;
    Ok(MacdSeries {
        macd: gaps.mask(series.macd, slow - 1, 1),
        signal: gaps.mask(series.signal, signal_warmup, 1),
        histogram: gaps.mask(series.histogram, signal_warmup, 1),
    })
}

pub struct BollingerSeries {
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
    pub middle: Vec<f64>,
}

pub fn bollinger(values: &[f64], window: usize, multiplier: f64) -> Result<BollingerSeries> {
    let mut ind =
        BollingerBands::new(window, multiplier).map_err(|e| indicator_error("bollinger", e))?;
    let gaps = Gaps::of_values(values);
    let mut upper = vec![f64::NAN; values.len()];
    let mut lower = vec![f64::NAN; values.len()];
    let mut middle = vec![f64::NAN; values.len()];
    for (i, v) in values.iter().enumerate() {
        if gaps.usable(i) {
            let out = ind.next(*v);
            upper[i] = out.upper;
            lower[i] = out.lower;
            middle[i] = out.average;
        }
    }
    Ok(BollingerSeries {
        upper: gaps.mask(upper, window - 1, window),
        lower: gaps.mask(lower, window - 1, window),
        middle: gaps.mask(middle, window - 1, window),
    })
}

pub fn atr(bars: &[Bar], window: usize) -> Result<Vec<f64>> {
    let mut ind = AverageTrueRange::new(window).map_err(|e| indicator_error("atr", e))?;
    let gaps = Gaps::of_bars(bars);
    let out = gaps.feed(bars, |b| ind.next(b));
    Ok(gaps.mask(out, window - 1, 1))
}

/// Stochastic %K over `window` and %D as its `smooth`-period mean.
pub fn stochastic(bars: &[Bar], window: usize, smooth: usize) -> Result<(Vec<f64>, Vec<f64>)> {
    let mut ind = FastStochastic::new(window).map_err(|e| indicator_error("stochastic", e))?;
    let gaps = Gaps::of_bars(bars);
    let k = gaps.mask(gaps.feed(bars, |b| ind.next(b)), window - 1, window);
    let d = sma(&k, smooth)?;
    Ok((k, d))
}

/// On-balance volume over the given price basis. Rows without a usable price
/// or volume are missing and leave the running total unchanged.
pub fn obv(prices: &[f64], volumes: &[f64]) -> Vec<f64> {
    let mut ind = OnBalanceVolume::new();
    let bars: Vec<Bar> = prices
        .iter()
        .zip(volumes)
        .map(|(p, v)| Bar {
            open: *p,
            high: *p,
            low: *p,
            close: *p,
            volume: *v,
        })
        .collect();
    let gaps = Gaps::new(bars.iter().map(|b| b.close.is_finite() && b.volume.is_finite()));
    gaps.feed(&bars, |b| ind.next(b))
}

/// Cumulative volume times one-period return; undefined on the first bar.
pub fn vpt(prices: &[f64], volumes: &[f64]) -> Vec<f64> {
    let returns = pct_change(prices, 1);
    let mut out = vec![f64::NAN; prices.len()];
    let mut acc = 0.0;
    for i in 1..prices.len() {
        let step = returns[i] * volumes[i];
        if step.is_finite() {
            acc += step;
        }
        out[i] = acc;
    }
    out
}

/// `(last - first) / n` over the trailing window, `n` being the number of
/// points actually in the window (at least two).
pub fn slope(values: &[f64], window: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let n = i + 1 - start;
            if n < 2 {
                f64::NAN
            } else {
                (values[i] - values[start]) / n as f64
            }
        })
        .collect()
}

/// Sample standard deviation of one-period returns, from the first defined return.
pub fn return_stdev(prices: &[f64], window: usize) -> Vec<f64> {
    rolling_std(&pct_change(prices, 1), window, 1)
}

fn trailing_extremes(bars: &[Bar], i: usize, window: usize) -> (f64, f64) {
    bars[i + 1 - window..=i]
        .iter()
        .fold((f64::NEG_INFINITY, f64::INFINITY), |(hh, ll), b| {
            (hh.max(b.high), ll.min(b.low))
        })
}

/// Williams %R in [-100, 0].
pub fn williams_r(bars: &[Bar], window: usize) -> Result<Vec<f64>> {
    if window == 0 {
        return Err(indicator_error("williams_r", "window must be > 0"));
    }
    let out = (0..bars.len())
        .map(|i| {
            if i + 1 < window {
                return f64::NAN;
            }
            let (hh, ll) = trailing_extremes(bars, i, window);
            if hh > ll {
                -100.0 * (hh - bars[i].close) / (hh - ll)
            } else {
                f64::NAN
            }
        })
        .collect();
    Ok(Gaps::of_bars(bars).mask(out, window - 1, window))
}

/// Commodity Channel Index on the typical price.
pub fn cci(bars: &[Bar], window: usize, constant: f64) -> Result<Vec<f64>> {
    if window == 0 || constant <= 0.0 {
        return Err(indicator_error("cci", (window, constant)));
    }
    let typical: Vec<f64> = bars.iter().map(|b| (b.high + b.low + b.close) / 3.0).collect();
    let out = (0..bars.len())
        .map(|i| {
            if i + 1 < window {
                return f64::NAN;
            }
            let slice = &typical[i + 1 - window..=i];
            let mean = slice.iter().sum::<f64>() / window as f64;
            let mad = slice.iter().map(|t| (t - mean).abs()).sum::<f64>() / window as f64;
            if mad > 0.0 {
                (typical[i] - mean) / (constant * mad)
            } else {
                f64::NAN
            }
        })
        .collect();
    Ok(Gaps::of_bars(bars).mask(out, window - 1, window))
}

pub struct DirectionalSeries {
    pub adx: Vec<f64>,
    pub plus_di: Vec<f64>,
    pub minus_di: Vec<f64>,
}

/// Wilder's directional movement system.
///
/// +DI/-DI are defined once `period` true ranges have been accumulated (bar
/// `period`); ADX seeds as the mean of the first `period` DX values (bar
/// `2 * period - 1`) and is Wilder-smoothed afterwards.
pub struct DirectionalMovement {
    period: usize,
    prev: Option<Bar>,
    tr_smooth: f64,
    plus_dm_smooth: f64,
    minus_dm_smooth: f64,
    dx_sum: f64,
    adx_smooth: f64,
    count: usize,
}

impl DirectionalMovement {
    pub fn new(period: usize) -> Result<Self> {
        if period == 0 {
            return Err(indicator_error("adx", "period must be > 0"));
        }
        Ok(Self {
            period,
            prev: None,
            tr_smooth: 0.0,
            plus_dm_smooth: 0.0,
            minus_dm_smooth: 0.0,
            dx_sum: 0.0,
            adx_smooth: 0.0,
            count: 0,
        })
    }

    /// Returns (adx, +DI, -DI), NaN while warming up.
    pub fn next(&mut self, bar: &Bar) -> (f64, f64, f64) {
        let Some(prev) = self.prev.replace(*bar) else {
            return (f64::NAN, f64::NAN, f64::NAN);
        };

        let tr = (bar.high - bar.low)
            .max((bar.high - prev.close).abs())
            .max((bar.low - prev.close).abs());
        let up_move = bar.high - prev.high;
        let down_move = prev.low - bar.low;
        let plus_dm = if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        };
        let minus_dm = if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        };

        self.count += 1;
        let n = self.period as f64;
        if self.count <= self.period {
            self.tr_smooth += tr;
            self.plus_dm_smooth += plus_dm;
            self.minus_dm_smooth += minus_dm;
            if self.count < self.period {
                return (f64::NAN, f64::NAN, f64::NAN);
            }
        } else {
            self.tr_smooth = self.tr_smooth - (self.tr_smooth / n) + tr;
            self.plus_dm_smooth = self.plus_dm_smooth - (self.plus_dm_smooth / n) + plus_dm;
            self.minus_dm_smooth = self.minus_dm_smooth - (self.minus_dm_smooth / n) + minus_dm;
        }

        let (plus_di, minus_di) = if self.tr_smooth > 0.0 {
            (
                100.0 * self.plus_dm_smooth / self.tr_smooth,
                100.0 * self.minus_dm_smooth / self.tr_smooth,
            )
        } else {
            (0.0, 0.0)
        };
        let sum_di = plus_di + minus_di;
        let dx = if sum_di > 0.0 {
            100.0 * (plus_di - minus_di).abs() / sum_di
        } else {
            0.0
        };

        // DX values seen so far: count - period + 1
        let dx_seen = self.count + 1 - self.period;
        let adx = if dx_seen < self.period {
            self.dx_sum += dx;
            f64::NAN
        } else if dx_seen == self.period {
            self.dx_sum += dx;
            self.adx_smooth = self.dx_sum / n;
            self.adx_smooth
        } else {
            self.adx_smooth = (self.adx_smooth * (n - 1.0) + dx) / n;
            self.adx_smooth
        };
        (adx, plus_di, minus_di)
    }
}

pub fn directional(bars: &[Bar], period: usize) -> Result<DirectionalSeries> {
    let mut ind = DirectionalMovement::new(period)?;
    let mut series = DirectionalSeries {
        adx: Vec::with_capacity(bars.len()),
        plus_di: Vec::with_capacity(bars.len()),
        minus_di: Vec::with_capacity(bars.len()),
    };
    for bar in bars {
        let (adx, plus, minus) = if bar.has_prices() {
            ind.next(bar)
        } else {
            (f64::NAN, f64::NAN, f64::NAN)
        };
        series.adx.push(adx);
        series.plus_di.push(plus);
        series.minus_di.push(minus);
    }
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trending_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let c = 100.0 + i as f64;
                Bar {
                    open: c - 0.5,
                    high: c + 1.0,
                    low: c - 1.0,
                    close: c,
                    volume: 1000.0,
                }
            })
            .collect()
    }

    #[test]
    fn test_sma_warmup_and_value() {
        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        let out = sma(&values, 5).unwrap();
        assert!(out[..4].iter().all(|v| v.is_nan()));
        assert!((out[4] - 3.0).abs() < 1e-12);
        assert!((out[9] - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_window_is_error() {
        assert!(sma(&[1.0, 2.0], 0).is_err());
        assert!(williams_r(&trending_bars(3), 0).is_err());
    }

    #[test]
    fn test_macd_warmups() {
        let values: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64).sin()).collect();
        let out = macd(&values, 12, 26, 9).unwrap();
        assert!(out.macd[24].is_nan() && out.macd[25].is_finite());
        assert!(out.signal[32].is_nan() && out.signal[33].is_finite());
        assert!(out.histogram[33].is_finite());
    }

    #[test]
    fn test_slope_uses_actual_window_length() {
        let out = slope(&[1.0, 3.0, 5.0, 7.0], 3);
        assert!(out[0].is_nan());
        assert!((out[1] - 1.0).abs() < 1e-12);
        // (5 - 1) / 3 and (7 - 3) / 3
        assert!((out[2] - 4.0 / 3.0).abs() < 1e-12);
        assert!((out[3] - 4.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_williams_r_at_high_is_zero() {
        let out = williams_r(&trending_bars(20), 14).unwrap();
        assert!(out[12].is_nan());
        // close = high - 1, range over 14 bars = 15
        assert!((out[13] - (-100.0 / 15.0)).abs() < 1e-9);
    }

    #[test]
    fn test_cci_flat_series_is_missing() {
        let bars = vec![
            Bar {
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1.0,
            };
            25
        ];
        assert!(cci(&bars, 20, 0.015).unwrap().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_adx_warmup_and_trend_direction() {
        let out = directional(&trending_bars(40), 14).unwrap();
        assert!(out.plus_di[13].is_nan() && out.plus_di[14].is_finite());
        assert!(out.adx[26].is_nan() && out.adx[27].is_finite());
        assert!(out.plus_di[30] > out.minus_di[30]);
        assert!(out.adx[39] > 50.0);
    }

    #[test]
    fn test_vpt_first_is_missing() {
        let out = vpt(&[10.0, 11.0, 11.0], &[100.0, 100.0, 100.0]);
        assert!(out[0].is_nan());
        assert!((out[1] - 10.0).abs() < 1e-9);
        assert!((out[2] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_obv_accumulates_on_up_days() {
        let out = obv(&[1.0, 2.0, 3.0], &[1000.0; 3]);
        assert_eq!(out, vec![1000.0, 2000.0, 3000.0]);
    }

    #[test]
    fn test_obv_skips_missing_price() {
        let out = obv(&[1.0, f64::NAN, 3.0, 2.0], &[1000.0; 4]);
        assert!(out[1].is_nan());
        assert_eq!(out[2], 2000.0);
        assert_eq!(out[3], 1000.0);
    }

    #[test]
    fn test_sma_recovers_once_gap_leaves_window() {
        let mut values: Vec<f64> = (1..=20).map(f64::from).collect();
        values[7] = f64::NAN;
        let out = sma(&values, 5).unwrap();
        assert!((out[6] - 5.0).abs() < 1e-12);
        assert!(out[7..12].iter().all(|v| v.is_nan()));
        // mean of 9..=13
        assert!((out[12] - 11.0).abs() < 1e-12);
        assert!((out[19] - 18.0).abs() < 1e-12);
    }

    #[test]
    fn test_stateful_indicators_survive_a_gap() {
        let mut values: Vec<f64> = (0..80).map(|i| 100.0 + i as f64 + (i as f64).sin()).collect();
        values[30] = f64::NAN;
        let ema = ema(&values, 21).unwrap();
        let rsi = rsi(&values, 14).unwrap();
        let macd = macd(&values, 12, 26, 9).unwrap();
        let bb = bollinger(&values, 20, 2.0).unwrap();
        for series in [&ema, &rsi, &macd.macd, &macd.signal, &bb.middle] {
            assert!(series[30].is_nan());
            assert!(series[79].is_finite());
        }
        assert!(ema[31].is_finite());
        assert!(bb.upper[49].is_nan() && bb.upper[50].is_finite());
    }

    #[test]
    fn test_bar_indicators_survive_a_missing_close() {
        let mut bars = trending_bars(60);
        bars[20].close = f64::NAN;
        let (k, d) = stochastic(&bars, 14, 3).unwrap();
        assert!(k[33].is_nan() && k[34].is_finite());
        assert!(d[35].is_nan() && d[36].is_finite());
        let atr = atr(&bars, 14).unwrap();
        assert!(atr[20].is_nan() && atr[21].is_finite());
        let wr = williams_r(&bars, 14).unwrap();
        assert!(wr[33].is_nan() && wr[34].is_finite());
        let dm = directional(&bars, 14).unwrap();
        assert!(dm.adx[20].is_nan() && dm.adx[59].is_finite());
    }
}
