//! Trailing-window statistics over per-symbol series.
//!
//! Windows are right-aligned: the value at index `i` summarizes
//! `values[i + 1 - window ..= i]`, so nothing after `i` is ever read. Missing
//! values (NaN) are skipped and do not count toward `min_periods`.

use statrs::statistics::{Data, Distribution, Median, OrderStatistics};

fn trailing_observations(values: &[f64], end: usize, window: usize) -> Vec<f64> {
    let start = (end + 1).saturating_sub(window);
    values[start..=end]
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .collect()
}

fn rolling_apply<F>(values: &[f64], window: usize, min_periods: usize, f: F) -> Vec<f64>
where
    F: Fn(Vec<f64>) -> Option<f64>,
{
    let min_periods = min_periods.max(1);
    (0..values.len())
        .map(|i| {
            let obs = trailing_observations(values, i, window);
            if obs.len() < min_periods {
                f64::NAN
            } else {
                f(obs).unwrap_or(f64::NAN)
            }
        })
        .collect()
}

pub fn rolling_mean(values: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    rolling_apply(values, window, min_periods, |obs| Data::new(obs).mean())
}

/// Sample standard deviation; undefined with fewer than two observations.
pub fn rolling_std(values: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    rolling_apply(values, window, min_periods, |obs| {
        if obs.len() < 2 {
            None
        } else {
            Data::new(obs).std_dev()
        }
    })
}

pub fn rolling_median(values: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    rolling_apply(values, window, min_periods, |obs| {
        Some(Data::new(obs).median())
    })
}

/// `values[i] / values[i - periods] - 1`; missing when either side is missing
/// or the base is zero.
pub fn pct_change(values: &[f64], periods: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            if periods == 0 || i < periods {
                return f64::NAN;
            }
            let base = values[i - periods];
            let current = values[i];
            if base.is_finite() && current.is_finite() && base != 0.0 {
                current / base - 1.0
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// Quantile of the non-missing values, `tau` in [0, 1].
pub fn quantile(values: &[f64], tau: f64) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    Some(Data::new(finite).quantile(tau))
}

/// Bias-corrected sample skewness (adjusted Fisher-Pearson).
pub fn calculate_skewness(values: &[f64]) -> Option<f64> {
    let (n, m2, m3, _) = central_moments(values)?;
    if n < 3.0 || m2 < 1e-20 {
        return None;
    }
    let g1 = m3 / m2.powf(1.5);
    Some((n * (n - 1.0)).sqrt() / (n - 2.0) * g1)
}

/// Bias-corrected sample excess kurtosis.
pub fn calculate_kurtosis(values: &[f64]) -> Option<f64> {
    let (n, m2, _, m4) = central_moments(values)?;
    if n < 4.0 || m2 < 1e-20 {
        return None;
    }
    let g2 = m4 / (m2 * m2) - 3.0;
    Some(((n + 1.0) * g2 + 6.0) * (n - 1.0) / ((n - 2.0) * (n - 3.0)))
}

fn central_moments(values: &[f64]) -> Option<(f64, f64, f64, f64)> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    let moment = |k: i32| finite.iter().map(|v| (v - mean).powi(k)).sum::<f64>() / n;
    Some((n, moment(2), moment(3), moment(4)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn test_rolling_mean_respects_min_periods() {
        let out = rolling_mean(&[1.0, 2.0, 3.0, 4.0], 3, 2);
        assert!(out[0].is_nan());
        assert_close(out[1], 1.5);
        assert_close(out[2], 2.0);
        assert_close(out[3], 3.0);
    }

    #[test]
    fn test_rolling_std_is_sample_std() {
        let out = rolling_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 8, 1);
        assert!(out[0].is_nan());
        // sample variance of the full window is 32/7
        assert_close(out[7], (32.0f64 / 7.0).sqrt());
    }

    #[test]
    fn test_rolling_median_skips_missing() {
        let out = rolling_median(&[1.0, f64::NAN, 5.0, 3.0], 4, 1);
        assert_close(out[2], 3.0);
        assert_close(out[3], 3.0);
    }

    #[test]
    fn test_pct_change_is_backward_looking() {
        let out = pct_change(&[100.0, 110.0, 99.0], 1);
        assert!(out[0].is_nan());
        assert_close(out[1], 0.1);
        assert_close(out[2], -0.1);
        assert!(pct_change(&[0.0, 1.0], 1)[1].is_nan());
    }

    #[test]
    fn test_quantile_bounds() {
        let values: Vec<f64> = (1..=101).map(f64::from).collect();
        assert_close(quantile(&values, 0.0).unwrap(), 1.0);
        assert_close(quantile(&values, 1.0).unwrap(), 101.0);
        assert_close(quantile(&values, 0.5).unwrap(), 51.0);
        assert!(quantile(&[f64::NAN], 0.5).is_none());
    }

    #[test]
    fn test_skewness_sign() {
        let right_tail = [1.0, 1.0, 1.0, 2.0, 2.0, 10.0];
        assert!(calculate_skewness(&right_tail).unwrap() > 0.0);
        assert!(calculate_skewness(&[1.0, 1.0, 1.0]).is_none());
    }

    #[test]
    fn test_kurtosis_of_uniform_is_negative() {
        let values: Vec<f64> = (0..100).map(f64::from).collect();
        assert!(calculate_kurtosis(&values).unwrap() < 0.0);
    }
}
