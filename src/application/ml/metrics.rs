//! Binary classification metrics on probability scores.
//!
//! Undefined values (single-class AUC, empty input) are `None` so callers
//! can skip them when aggregating.

use serde::{Deserialize, Serialize};

pub const DECISION_THRESHOLD: f64 = 0.5;

/// The five metrics recorded per fold, per symbol, and in-sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub auc: Option<f64>,
    pub accuracy: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub average_precision: Option<f64>,
}

impl ClassificationMetrics {
    pub const NAMES: [&'static str; 5] =
        ["auc", "accuracy", "precision", "recall", "average_precision"];

    pub fn compute(labels: &[f64], scores: &[f64]) -> Self {
        Self {
            auc: roc_auc(labels, scores),
            accuracy: accuracy(labels, scores),
            precision: precision(labels, scores),
            recall: recall(labels, scores),
            average_precision: average_precision(labels, scores),
        }
    }

    /// (name, value) pairs in `NAMES` order.
    pub fn entries(&self) -> [(&'static str, Option<f64>); 5] {
        [
            ("auc", self.auc),
            ("accuracy", self.accuracy),
            ("precision", self.precision),
            ("recall", self.recall),
            ("average_precision", self.average_precision),
        ]
    }
}

/// Area under the ROC curve with average ranks for tied scores.
pub fn roc_auc(labels: &[f64], scores: &[f64]) -> Option<f64> {
    let n_pos = labels.iter().filter(|y| **y == 1.0).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut pos_rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // ranks are 1-based; ties share the mean rank
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if labels[idx] == 1.0 {
                pos_rank_sum += rank;
            }
        }
        i = j + 1;
    }
    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Some((pos_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

struct Confusion {
    tp: usize,
    fp: usize,
    tn: usize,
    fn_: usize,
}

fn confusion(labels: &[f64], scores: &[f64]) -> Confusion {
    let mut c = Confusion {
        tp: 0,
        fp: 0,
        tn: 0,
        fn_: 0,
    };
    for (y, s) in labels.iter().zip(scores) {
        match (*y == 1.0, *s >= DECISION_THRESHOLD) {
            (true, true) => c.tp += 1,
            (false, true) => c.fp += 1,
            (false, false) => c.tn += 1,
            (true, false) => c.fn_ += 1,
        }
    }
    c
}

pub fn accuracy(labels: &[f64], scores: &[f64]) -> Option<f64> {
    if labels.is_empty() {
        return None;
    }
    let c = confusion(labels, scores);
    Some((c.tp + c.tn) as f64 / labels.len() as f64)
}

/// Zero when nothing is predicted positive.
pub fn precision(labels: &[f64], scores: &[f64]) -> Option<f64> {
    if labels.is_empty() {
        return None;
    }
    let c = confusion(labels, scores);
    Some(safe_div(c.tp, c.tp + c.fp))
}

/// Zero when there are no positives.
pub fn recall(labels: &[f64], scores: &[f64]) -> Option<f64> {
    if labels.is_empty() {
        return None;
    }
    let c = confusion(labels, scores);
    Some(safe_div(c.tp, c.tp + c.fn_))
}

fn safe_div(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Step-wise average precision: sum over thresholds of
/// (R_n - R_{n-1}) * P_n, tied scores forming a single threshold.
pub fn average_precision(labels: &[f64], scores: &[f64]) -> Option<f64> {
    let n_pos = labels.iter().filter(|y| **y == 1.0).count();
    if n_pos == 0 {
        return None;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut tp = 0usize;
    let mut seen = 0usize;
    let mut prev_recall = 0.0;
    let mut ap = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        for &idx in &order[i..=j] {
            seen += 1;
            if labels[idx] == 1.0 {
                tp += 1;
            }
        }
        let recall = tp as f64 / n_pos as f64;
        let precision = tp as f64 / seen as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
        i = j + 1;
    }
    Some(ap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auc_perfect_and_inverted() {
        let y = [0.0, 0.0, 1.0, 1.0];
        assert_eq!(roc_auc(&y, &[0.1, 0.2, 0.8, 0.9]), Some(1.0));
        assert_eq!(roc_auc(&y, &[0.9, 0.8, 0.2, 0.1]), Some(0.0));
    }

    #[test]
    fn test_auc_with_ties() {
        let y = [0.0, 1.0, 0.0, 1.0];
        assert_eq!(roc_auc(&y, &[0.5, 0.5, 0.5, 0.5]), Some(0.5));
        // sklearn: roc_auc_score([0,0,1,1],[0.1,0.4,0.35,0.8]) == 0.75
        assert_eq!(
            roc_auc(&[0.0, 0.0, 1.0, 1.0], &[0.1, 0.4, 0.35, 0.8]),
            Some(0.75)
        );
    }

    #[test]
    fn test_single_class_is_undefined() {
        assert_eq!(roc_auc(&[1.0, 1.0], &[0.2, 0.9]), None);
        assert_eq!(average_precision(&[0.0, 0.0], &[0.2, 0.9]), None);
    }

    #[test]
    fn test_threshold_metrics() {
        let y = [1.0, 0.0, 1.0, 0.0];
        let s = [0.9, 0.6, 0.4, 0.1];
        let m = ClassificationMetrics::compute(&y, &s);
        assert_eq!(m.accuracy, Some(0.5));
        assert_eq!(m.precision, Some(0.5));
        assert_eq!(m.recall, Some(0.5));
    }

    #[test]
    fn test_precision_zero_division() {
        assert_eq!(precision(&[1.0, 0.0], &[0.1, 0.2]), Some(0.0));
    }

    #[test]
    fn test_average_precision_matches_reference() {
        // sklearn: average_precision_score([0,0,1,1],[0.1,0.4,0.35,0.8]) ~= 0.8333
        let ap = average_precision(&[0.0, 0.0, 1.0, 1.0], &[0.1, 0.4, 0.35, 0.8]).unwrap();
        assert!((ap - 0.833_333_333).abs() < 1e-6);
    }
}
