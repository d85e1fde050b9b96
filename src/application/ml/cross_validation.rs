use crate::application::ml::metrics::ClassificationMetrics;
use crate::domain::dataset::Timestamp;
use crate::domain::errors::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use std::ops::Range;

/// One expanding-window fold over chronologically ordered rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub index: usize,
    pub train: Range<usize>,
    pub validation: Range<usize>,
}

/// Expanding-window splitter: `n_splits` contiguous validation blocks of
/// `n / (n_splits + 1)` rows at the end of the data, each trained on
/// everything before it.
///
/// Block starts are pushed forward past rows sharing the previous row's
/// timestamp, so a date is never on both sides of a fold.
#[derive(Debug, Clone, Copy)]
pub struct TimeSeriesSplit {
    n_splits: usize,
}

impl TimeSeriesSplit {
    pub fn new(n_splits: usize) -> Result<Self> {
        if n_splits < 2 {
            return Err(PipelineError::Config(format!(
                "cv_splits must be at least 2, got {}",
                n_splits
            )));
        }
        Ok(Self { n_splits })
    }

    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    /// Rows needed for every block to hold at least one row.
    pub fn min_rows(&self) -> usize {
        self.n_splits + 1
    }

    pub fn split(&self, timestamps: &[Timestamp]) -> Result<Vec<Fold>> {
        let n = timestamps.len();
        if n < self.min_rows() {
            return Err(PipelineError::Validation(format!(
                "{} rows are not enough for {} time-series splits",
                n, self.n_splits
            )));
        }
        if timestamps.windows(2).any(|w| w[0] > w[1]) {
            return Err(PipelineError::Validation(
                "rows must be in chronological order before splitting".to_string(),
            ));
        }

        let test_size = n / (self.n_splits + 1);
        let snap = |mut start: usize| {
            while start > 0 && start < n && timestamps[start] == timestamps[start - 1] {
                start += 1;
            }
            start
        };
        let starts: Vec<usize> = (0..self.n_splits)
            .map(|i| snap(n - (self.n_splits - i) * test_size))
            .chain(std::iter::once(n))
            .collect();

        let folds: Vec<Fold> = starts
            .windows(2)
            .enumerate()
            .filter(|(_, w)| w[0] < w[1])
            .map(|(index, w)| Fold {
                index,
                train: 0..w[0],
                validation: w[0]..w[1],
            })
            .collect();
        if folds.len() < self.n_splits {
            return Err(PipelineError::Validation(format!(
                "only {} of {} folds have distinct validation dates",
                folds.len(),
                self.n_splits
            )));
        }
        Ok(folds)
    }
}

/// Everything recorded for one fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldRecord {
    pub fold: usize,
    pub train_size: usize,
    pub validation_size: usize,
    pub train_end: Timestamp,
    pub validation_start: Timestamp,
    pub best_iteration: usize,
    pub metrics: ClassificationMetrics,
    pub by_symbol: BTreeMap<String, ClassificationMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub scores: Vec<Option<f64>>,
}

impl MetricSummary {
    /// Mean and population std over the defined scores only.
    pub fn from_scores(scores: Vec<Option<f64>>) -> Self {
        let defined: Vec<f64> = scores.iter().flatten().copied().collect();
        let (mean, std) = if defined.is_empty() {
            (None, None)
        } else {
            (
                Some(defined.iter().mean()),
                Some(defined.iter().population_std_dev()),
            )
        };
        Self { mean, std, scores }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossValidationSummary {
    pub folds: Vec<FoldRecord>,
    /// Metric name to summary, including `best_iteration`.
    pub metrics: BTreeMap<String, MetricSummary>,
    /// Symbol to metric to mean across the folds where it was defined.
    pub by_symbol: BTreeMap<String, BTreeMap<String, Option<f64>>>,
}

impl CrossValidationSummary {
    pub fn from_folds(folds: Vec<FoldRecord>) -> Self {
        let mut metrics = BTreeMap::new();
        for name in ClassificationMetrics::NAMES {
            let scores = folds
                .iter()
                .map(|f| metric_value(&f.metrics, name))
                .collect();
            metrics.insert(name.to_string(), MetricSummary::from_scores(scores));
        }
        metrics.insert(
            "best_iteration".to_string(),
            MetricSummary::from_scores(
                folds
                    .iter()
                    .map(|f| Some(f.best_iteration as f64))
                    .collect(),
            ),
        );

        let mut per_symbol: BTreeMap<String, BTreeMap<String, Vec<f64>>> = BTreeMap::new();
        for fold in &folds {
            for (symbol, m) in &fold.by_symbol {
                let entry = per_symbol.entry(symbol.clone()).or_default();
                for (name, value) in m.entries() {
                    let scores = entry.entry(name.to_string()).or_default();
                    if let Some(v) = value {
                        scores.push(v);
                    }
                }
            }
        }
        let by_symbol = per_symbol
            .into_iter()
            .map(|(symbol, by_metric)| {
                let means = by_metric
                    .into_iter()
                    .map(|(name, scores)| {
                        let mean = (!scores.is_empty()).then(|| scores.iter().mean());
                        (name, mean)
                    })
                    .collect();
                (symbol, means)
            })
            .collect();

        Self {
            folds,
            metrics,
            by_symbol,
        }
    }

    pub fn mean(&self, metric: &str) -> Option<f64> {
        self.metrics.get(metric).and_then(|m| m.mean)
    }

    pub fn best_iterations(&self) -> Vec<usize> {
        self.folds.iter().map(|f| f.best_iteration).collect()
    }
}

fn metric_value(metrics: &ClassificationMetrics, name: &str) -> Option<f64> {
    metrics
        .entries()
        .into_iter()
        .find(|(n, _)| *n == name)
        .and_then(|(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset, NaiveDate, TimeZone};

    fn daily(days: usize, per_day: usize) -> Vec<Timestamp> {
        let tz = FixedOffset::east_opt(0).unwrap();
        let start = tz
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(2024, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
            )
            .unwrap();
        (0..days)
            .flat_map(|d| std::iter::repeat_n(start + Duration::days(d as i64), per_day))
            .collect()
    }

    #[test]
    fn test_sklearn_layout_without_ties() {
        let folds = TimeSeriesSplit::new(5).unwrap().split(&daily(12, 1)).unwrap();
        assert_eq!(folds.len(), 5);
        assert_eq!(folds[0].train, 0..2);
        assert_eq!(folds[0].validation, 2..4);
        assert_eq!(folds[4].validation, 10..12);
    }

    #[test]
    fn test_boundaries_respect_timestamps() {
        let ts = daily(40, 3);
        let folds = TimeSeriesSplit::new(5).unwrap().split(&ts).unwrap();
        for fold in &folds {
            let train_max = ts[fold.train.end - 1];
            let valid_min = ts[fold.validation.start];
            assert!(train_max < valid_min);
        }
    }

    #[test]
    fn test_too_few_rows() {
        assert!(TimeSeriesSplit::new(5).unwrap().split(&daily(5, 1)).is_err());
        assert!(TimeSeriesSplit::new(1).is_err());
    }

    #[test]
    fn test_summary_skips_undefined() {
        let ts = daily(2, 1);
        let record = |auc: Option<f64>, best: usize| FoldRecord {
            fold: 0,
            train_size: 1,
            validation_size: 1,
            train_end: ts[0],
            validation_start: ts[1],
            best_iteration: best,
            metrics: ClassificationMetrics {
                auc,
                accuracy: Some(0.5),
                ..Default::default()
            },
            by_symbol: BTreeMap::new(),
        };
        let summary =
            CrossValidationSummary::from_folds(vec![record(Some(0.6), 10), record(None, 20)]);
        assert_eq!(summary.mean("auc"), Some(0.6));
        assert_eq!(summary.metrics["auc"].scores.len(), 2);
        assert_eq!(summary.mean("best_iteration"), Some(15.0));
        assert_eq!(summary.metrics["accuracy"].std, Some(0.0));
    }
}
