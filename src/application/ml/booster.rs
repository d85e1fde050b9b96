//! Histogram gradient-boosted decision trees for binary log-loss.
//!
//! Trees grow leaf-wise (best gain first) up to `num_leaves`, over features
//! pre-binned into at most `max_bin` buckets. Row bagging, per-tree feature
//! sampling and L1/L2 leaf regularization follow the usual GBDT recipe.
//! Missing values always go to the left child.

use crate::application::ml::metrics::roc_auc;
use crate::config::ModelConfig;
use crate::domain::errors::{PipelineError, Result};
use crate::domain::ml::FeatureMatrix;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};
use tracing::debug;

const MIN_SUM_HESSIAN: f64 = 1e-3;
const PROB_EPS: f64 = 1e-15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        gain: f64,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict_row(&self, x: &FeatureMatrix, row: usize) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    // NaN compares false and falls to the left
                    idx = if x.value(row, *feature) > *threshold {
                        *right
                    } else {
                        *left
                    };
                }
            }
        }
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }
}

/// Feature values quantized to bin indices, column-major.
struct BinnedMatrix {
    bins: Vec<Vec<u16>>,
    /// Upper bound (inclusive) of every bin except the last, per feature.
    thresholds: Vec<Vec<f64>>,
}

impl BinnedMatrix {
    fn build(x: &FeatureMatrix, max_bin: usize) -> Self {
        let mut bins = Vec::with_capacity(x.n_features());
        let mut thresholds = Vec::with_capacity(x.n_features());
        for column in x.columns() {
            let cuts = bin_thresholds(column, max_bin);
            bins.push(
                column
                    .iter()
                    .map(|v| cuts.partition_point(|t| *v > *t) as u16)
                    .collect(),
            );
            thresholds.push(cuts);
        }
        Self { bins, thresholds }
    }

    fn n_bins(&self, feature: usize) -> usize {
        self.thresholds[feature].len() + 1
    }
}

fn bin_thresholds(column: &[f64], max_bin: usize) -> Vec<f64> {
    let mut distinct: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();
    if distinct.len() < 2 {
        return Vec::new();
    }
    let midpoint = |i: usize| (distinct[i - 1] + distinct[i]) / 2.0;
    if distinct.len() <= max_bin {
        return (1..distinct.len()).map(midpoint).collect();
    }
    let mut cuts: Vec<f64> = (1..max_bin)
        .map(|k| midpoint((k * distinct.len() / max_bin).max(1)))
        .collect();
    cuts.dedup();
    cuts
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    bin: usize,
    gain: f64,
}

struct GrowingLeaf {
    node: usize,
    rows: Vec<usize>,
    depth: usize,
    sum_g: f64,
    sum_h: f64,
    best: Option<SplitCandidate>,
}

/// Row-level gradient statistics shared by every leaf of one tree.
struct TreeContext<'a> {
    binned: &'a BinnedMatrix,
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [usize],
    config: &'a ModelConfig,
}

fn threshold_l1(g: f64, alpha: f64) -> f64 {
    g.signum() * (g.abs() - alpha).max(0.0)
}

impl TreeContext<'_> {
    fn leaf_score(&self, g: f64, h: f64) -> f64 {
        let t = threshold_l1(g, self.config.reg_alpha);
        t * t / (h + self.config.reg_lambda)
    }

    fn leaf_output(&self, g: f64, h: f64) -> f64 {
        -threshold_l1(g, self.config.reg_alpha) / (h + self.config.reg_lambda)
    }

    fn can_split(&self, rows: usize, depth: usize) -> bool {
        rows >= 2 * self.config.min_child_samples.max(1)
            && self.config.max_depth.is_none_or(|d| depth < d)
    }

    fn find_best_split(&self, rows: &[usize], sum_g: f64, sum_h: f64) -> Option<SplitCandidate> {
        let parent = self.leaf_score(sum_g, sum_h);
        let min_child = self.config.min_child_samples.max(1);
        let mut best: Option<SplitCandidate> = None;

        for &feature in self.features {
            let n_bins = self.binned.n_bins(feature);
            if n_bins < 2 {
                continue;
            }
            let mut hist = vec![(0.0f64, 0.0f64, 0usize); n_bins];
            let column = &self.binned.bins[feature];
            for &row in rows {
                let slot = &mut hist[column[row] as usize];
                slot.0 += self.grad[row];
                slot.1 += self.hess[row];
                slot.2 += 1;
            }

            let (mut gl, mut hl, mut cl) = (0.0, 0.0, 0usize);
            for (bin, (g, h, c)) in hist.iter().enumerate().take(n_bins - 1) {
                gl += g;
                hl += h;
                cl += c;
                let cr = rows.len() - cl;
                if cl < min_child {
                    continue;
                }
                if cr < min_child {
                    break;
                }
                let (gr, hr) = (sum_g - gl, sum_h - hl);
                if hl < MIN_SUM_HESSIAN || hr < MIN_SUM_HESSIAN {
                    continue;
                }
                let gain = self.leaf_score(gl, hl) + self.leaf_score(gr, hr) - parent;
                if gain > best.map_or(0.0, |b| b.gain) {
                    best = Some(SplitCandidate { feature, bin, gain });
                }
            }
        }
        best
    }

    fn leaf(&self, node: usize, rows: Vec<usize>, depth: usize) -> GrowingLeaf {
        let sum_g = rows.iter().map(|&r| self.grad[r]).sum();
        let sum_h = rows.iter().map(|&r| self.hess[r]).sum();
        let best = if self.can_split(rows.len(), depth) {
            self.find_best_split(&rows, sum_g, sum_h)
        } else {
            None
        };
        GrowingLeaf {
            node,
            rows,
            depth,
            sum_g,
            sum_h,
            best,
        }
    }

    fn grow(&self, rows: Vec<usize>) -> Tree {
        let mut nodes = vec![Node::Leaf { value: 0.0 }];
        let mut leaves = vec![self.leaf(0, rows, 0)];

        while leaves.len() < self.config.num_leaves {
            let Some(pick) = leaves
                .iter()
                .enumerate()
                .filter_map(|(i, l)| l.best.map(|b| (i, b.gain)))
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(i, _)| i)
            else {
                break;
            };
            let leaf = leaves.swap_remove(pick);
            let Some(split) = leaf.best else { break };

            let column = &self.binned.bins[split.feature];
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = leaf
                .rows
                .into_iter()
                .partition(|&r| column[r] as usize <= split.bin);

            let left = nodes.len();
            let right = left + 1;
            nodes.push(Node::Leaf { value: 0.0 });
            nodes.push(Node::Leaf { value: 0.0 });
            nodes[leaf.node] = Node::Split {
                feature: split.feature,
                threshold: self.binned.thresholds[split.feature][split.bin],
                left,
                right,
                gain: split.gain,
            };
            leaves.push(self.leaf(left, left_rows, leaf.depth + 1));
            leaves.push(self.leaf(right, right_rows, leaf.depth + 1));
        }

        for leaf in leaves {
            nodes[leaf.node] = Node::Leaf {
                value: self.config.learning_rate * self.leaf_output(leaf.sum_g, leaf.sum_h),
            };
        }
        Tree { nodes }
    }
}

/// Held-out rows monitored for early stopping.
pub struct EarlyStopping<'a> {
    pub x: &'a FeatureMatrix,
    pub y: &'a [f64],
    pub patience: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booster {
    n_features: usize,
    base_score: f64,
    trees: Vec<Tree>,
    best_iteration: Option<usize>,
}

impl Booster {
    /// Fits `config.n_estimators` rounds, or fewer when `early_stopping`
    /// stops improving for `patience` rounds. Validation AUC is monitored;
    /// a single-class validation block falls back to log-loss. The model is
    /// truncated to the best round.
    pub fn train(
        config: &ModelConfig,
        x: &FeatureMatrix,
        y: &[f64],
        early_stopping: Option<EarlyStopping<'_>>,
    ) -> Result<Self> {
        let n = x.n_rows();
        if n == 0 || y.len() != n {
            return Err(PipelineError::Validation(format!(
                "cannot train on {} rows with {} labels",
                n,
                y.len()
            )));
        }
        if let Some(es) = &early_stopping
            && (es.x.n_features() != x.n_features() || es.y.len() != es.x.n_rows())
        {
            return Err(PipelineError::Validation(
                "early-stopping set does not match the training layout".to_string(),
            ));
        }

        let binned = BinnedMatrix::build(x, config.max_bin);
        let mut rng = StdRng::seed_from_u64(config.random_state);

        let pos_rate = (y.iter().sum::<f64>() / n as f64).clamp(1e-6, 1.0 - 1e-6);
        let base_score = (pos_rate / (1.0 - pos_rate)).ln();
        let mut booster = Self {
            n_features: x.n_features(),
            base_score,
            trees: Vec::new(),
            best_iteration: None,
        };

        let mut scores = vec![base_score; n];
        let mut valid_scores = early_stopping
            .as_ref()
            .map(|es| vec![base_score; es.x.n_rows()]);
        let monitor_auc = early_stopping
            .as_ref()
            .is_some_and(|es| es.y.contains(&0.0) && es.y.contains(&1.0));
        let mut best: Option<(usize, f64)> = None;

        let bagging = config.bagging_freq > 0 && config.bagging_fraction < 1.0;
        let bag_size = ((config.bagging_fraction * n as f64).round() as usize).clamp(1, n);
        let mut bag: Vec<usize> = (0..n).collect();
        let n_features = x.n_features();
        let feature_count =
            ((config.feature_fraction * n_features as f64).ceil() as usize).clamp(1, n_features.max(1));

        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];
        for iteration in 0..config.n_estimators {
            for i in 0..n {
                let p = sigmoid(scores[i]);
                grad[i] = p - y[i];
                hess[i] = (p * (1.0 - p)).max(PROB_EPS);
            }
            if bagging && iteration % config.bagging_freq == 0 {
                bag = sample(&mut rng, n, bag_size).into_vec();
                bag.sort_unstable();
            }
            let features: Vec<usize> = if feature_count >= n_features {
                (0..n_features).collect()
            } else {
                let mut picked = sample(&mut rng, n_features, feature_count).into_vec();
                picked.sort_unstable();
                picked
            };

            let context = TreeContext {
                binned: &binned,
                grad: &grad,
                hess: &hess,
                features: &features,
                config,
            };
            let tree = context.grow(bag.clone());
            for (row, score) in scores.iter_mut().enumerate() {
                *score += tree.predict_row(x, row);
            }

            if let (Some(es), Some(vs)) = (&early_stopping, valid_scores.as_mut()) {
                for (row, score) in vs.iter_mut().enumerate() {
                    *score += tree.predict_row(es.x, row);
                }
                let metric = if monitor_auc {
                    let probs: Vec<f64> = vs.iter().map(|s| sigmoid(*s)).collect();
                    roc_auc(es.y, &probs).unwrap_or(0.5)
                } else {
                    -log_loss(es.y, vs)
                };
                booster.trees.push(tree);
                if best.is_none_or(|(_, b)| metric > b) {
                    best = Some((iteration, metric));
                }
                if let Some((best_iter, best_metric)) = best
                    && iteration - best_iter >= es.patience.max(1)
                {
                    debug!(
                        "Early stopping at round {}, best round {} ({} {:.5})",
                        iteration + 1,
                        best_iter + 1,
                        if monitor_auc { "auc" } else { "-logloss" },
                        best_metric
                    );
                    break;
                }
            } else {
                booster.trees.push(tree);
            }
        }

        if let Some((best_iter, _)) = best {
            booster.trees.truncate(best_iter + 1);
            booster.best_iteration = Some(best_iter + 1);
        }
        Ok(booster)
    }

    /// 1-based best round when trained with early stopping.
    pub fn best_iteration(&self) -> Option<usize> {
        self.best_iteration
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn predict_raw(&self, x: &FeatureMatrix) -> Vec<f64> {
        (0..x.n_rows())
            .map(|row| {
                self.base_score
                    + self
                        .trees
                        .iter()
                        .map(|t| t.predict_row(x, row))
                        .sum::<f64>()
            })
            .collect()
    }

    pub fn predict_proba(&self, x: &FeatureMatrix) -> Vec<f64> {
        self.predict_raw(x).into_iter().map(sigmoid).collect()
    }

    /// Total split gain per feature index.
    pub fn gain_importance(&self) -> Vec<f64> {
        let mut gains = vec![0.0; self.n_features];
        for tree in &self.trees {
            for node in &tree.nodes {
                if let Node::Split { feature, gain, .. } = node {
                    gains[*feature] += gain;
                }
            }
        }
        gains
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn log_loss(y: &[f64], raw: &[f64]) -> f64 {
    let total: f64 = y
        .iter()
        .zip(raw)
        .map(|(y, s)| {
            let p = sigmoid(*s).clamp(PROB_EPS, 1.0 - PROB_EPS);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum();
    total / y.len().max(1) as f64
}
