//! Least-squares gradient boosting over histogram-binned features.
//!
//! Each feature is cut into at most `max_bins` bins once per fit. Trees grow
//! best-first: the open leaf with the largest gain splits next until
//! `max_leaf_nodes` leaves exist or no leaf can split. Split gain is
//! `GL²/(nL+λ) + GR²/(nR+λ) − G²/(n+λ)` with unit hessians. Fitted trees keep
//! the real-valued bin edge as their threshold, so prediction needs no bins.

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::{error::LearningError, metrics::mean, outliers::percentile};

use super::{
    check_fit_input, check_width, invalid,
    tree::{RegressionTree, TreeNode},
};

/// Histogram gradient boosting hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoostingParams {
    /// Boosting iterations (one tree each).
    pub max_iter: usize,
    /// Shrinkage applied to every leaf value.
    pub learning_rate: f64,
    /// Leaf budget per tree; unlimited when `None`.
    pub max_leaf_nodes: Option<usize>,
    /// Depth limit per tree; unlimited when `None`.
    pub max_depth: Option<usize>,
    /// Minimum rows per leaf.
    pub min_samples_leaf: usize,
    /// L2 penalty on leaf values.
    pub l2_regularization: f64,
    /// Bins per feature, 2..=255.
    pub max_bins: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            max_iter: 100,
            learning_rate: 0.1,
            max_leaf_nodes: Some(31),
            max_depth: None,
            min_samples_leaf: 20,
            l2_regularization: 0.0,
            max_bins: 255,
        }
    }
}

impl BoostingParams {
    pub(crate) fn validate(&self) -> Result<(), LearningError> {
        const TYPE: &str = "hist_gradient_boosting";
        if self.max_iter == 0 {
            return Err(invalid(TYPE, "max_iter must be at least 1"));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(invalid(TYPE, "learning_rate must be positive"));
        }
        if self.max_leaf_nodes.is_some_and(|leaves| leaves < 2) {
            return Err(invalid(TYPE, "max_leaf_nodes must be at least 2"));
        }
        if self.max_depth == Some(0) {
            return Err(invalid(TYPE, "max_depth must be at least 1"));
        }
        if self.min_samples_leaf == 0 {
            return Err(invalid(TYPE, "min_samples_leaf must be at least 1"));
        }
        if !(self.l2_regularization >= 0.0 && self.l2_regularization.is_finite()) {
            return Err(invalid(TYPE, "l2_regularization must be non-negative"));
        }
        if !(2..=255).contains(&self.max_bins) {
            return Err(invalid(TYPE, "max_bins must be between 2 and 255"));
        }
        Ok(())
    }
}

/// Fitted or unfitted boosted ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistGradientBoosting {
    params: BoostingParams,
    random_state: u64,
    baseline: f64,
    trees: Vec<RegressionTree>,
    n_features: Option<usize>,
}

impl HistGradientBoosting {
    /// Unfitted model. Binning and growth are deterministic, so the seed is
    /// only recorded alongside the artifact.
    #[must_use]
    pub fn new(params: BoostingParams, random_state: u64) -> Self {
        Self {
            params,
            random_state,
            baseline: 0.0,
            trees: Vec::new(),
            n_features: None,
        }
    }

    /// Hyperparameters.
    #[must_use]
    pub const fn params(&self) -> &BoostingParams {
        &self.params
    }

    /// Seed recorded at construction.
    #[must_use]
    pub const fn random_state(&self) -> u64 {
        self.random_state
    }

    /// Number of boosting rounds fitted.
    #[must_use]
    pub fn n_iter(&self) -> usize {
        self.trees.len()
    }

    /// Fits `max_iter` trees to the running residuals, starting from the
    /// target mean.
    pub fn fit(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<(), LearningError> {
        check_fit_input(x, y)?;
        let bins = BinnedFeatures::new(x, self.params.max_bins);
        self.baseline = mean(y.iter().copied());
        let mut raw = vec![self.baseline; y.len()];
        let mut gradients = vec![0.0; y.len()];

        self.trees = Vec::with_capacity(self.params.max_iter);
        for _ in 0..self.params.max_iter {
            for ((g, r), t) in gradients.iter_mut().zip(&raw).zip(y) {
                *g = r - t;
            }
            let grown = TreeGrower {
                params: &self.params,
                bins: &bins,
                gradients: &gradients,
            }
            .grow();
            for (value, samples) in &grown.leaves {
                for &i in samples {
                    raw[i] += value;
                }
            }
            self.trees.push(grown.tree);
        }
        self.n_features = Some(x.ncols());
        Ok(())
    }

    /// Baseline plus the sum of tree outputs per row.
    pub fn predict(&self, x: &Array2<f64>) -> Result<Vec<f64>, LearningError> {
        check_width(x, self.n_features)?;
        Ok(x.rows()
            .into_iter()
            .map(|row| self.predict_row(row))
            .collect())
    }

    fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        self.baseline + self.trees.iter().map(|tree| tree.predict_row(row)).sum::<f64>()
    }
}

/// Column-major bin indices plus the bin edges per feature. A value lands in
/// bin `b` when it is `<= edges[b]` and greater than every earlier edge.
struct BinnedFeatures {
    codes: Vec<Vec<u8>>,
    edges: Vec<Vec<f64>>,
}

impl BinnedFeatures {
    fn new(x: &Array2<f64>, max_bins: usize) -> Self {
        let mut codes = Vec::with_capacity(x.ncols());
        let mut edges = Vec::with_capacity(x.ncols());
        for column in x.columns() {
            let feature_edges = bin_edges(column, max_bins);
            codes.push(
                column
                    .iter()
                    .map(|value| {
                        let bin = feature_edges.partition_point(|edge| edge < value);
                        u8::try_from(bin).unwrap_or(u8::MAX)
                    })
                    .collect(),
            );
            edges.push(feature_edges);
        }
        Self { codes, edges }
    }
}

fn bin_edges(column: ArrayView1<'_, f64>, max_bins: usize) -> Vec<f64> {
    let mut sorted: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    let mut distinct = sorted.clone();
    distinct.dedup();
    if distinct.len() <= max_bins {
        return distinct
            .windows(2)
            .map(|pair| pair[0] + (pair[1] - pair[0]) / 2.0)
            .collect();
    }
    let mut edges: Vec<f64> = (1..max_bins)
        .filter_map(|i| percentile(&sorted, i as f64 * 100.0 / max_bins as f64))
        .collect();
    edges.dedup();
    edges
}

struct BinSplit {
    feature: usize,
    bin: usize,
    gain: f64,
}

struct OpenLeaf {
    node: usize,
    samples: Vec<usize>,
    grad_sum: f64,
    depth: usize,
    split: Option<BinSplit>,
}

struct GrownTree {
    tree: RegressionTree,
    leaves: Vec<(f64, Vec<usize>)>,
}

struct TreeGrower<'a> {
    params: &'a BoostingParams,
    bins: &'a BinnedFeatures,
    gradients: &'a [f64],
}

impl TreeGrower<'_> {
    fn grow(&self) -> GrownTree {
        let all: Vec<usize> = (0..self.gradients.len()).collect();
        let mut nodes = vec![TreeNode::Leaf { value: 0.0 }];
        let mut open = vec![self.open_leaf(0, all, 0)];

        while self.params.max_leaf_nodes.map_or(true, |max| open.len() < max) {
            let best = open
                .iter()
                .enumerate()
                .filter_map(|(idx, leaf)| leaf.split.as_ref().map(|split| (idx, split.gain)))
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(idx, _)| idx);
            let Some(idx) = best else { break };
            let leaf = open.swap_remove(idx);
            let Some(split) = leaf.split else { break };

            let codes = &self.bins.codes[split.feature];
            let (left, right): (Vec<usize>, Vec<usize>) = leaf
                .samples
                .into_iter()
                .partition(|&i| usize::from(codes[i]) <= split.bin);
            let left_node = nodes.len();
            let right_node = left_node + 1;
            nodes.push(TreeNode::Leaf { value: 0.0 });
            nodes.push(TreeNode::Leaf { value: 0.0 });
            nodes[leaf.node] = TreeNode::Split {
                feature: split.feature,
                threshold: self.bins.edges[split.feature][split.bin],
                left: left_node,
                right: right_node,
            };
            open.push(self.open_leaf(left_node, left, leaf.depth + 1));
            open.push(self.open_leaf(right_node, right, leaf.depth + 1));
        }

        let lambda = self.params.l2_regularization;
        let leaves = open
            .into_iter()
            .map(|leaf| {
                let value =
                    -self.params.learning_rate * leaf.grad_sum / (leaf.samples.len() as f64 + lambda);
                nodes[leaf.node] = TreeNode::Leaf { value };
                (value, leaf.samples)
            })
            .collect();
        GrownTree {
            tree: RegressionTree::from_nodes(nodes),
            leaves,
        }
    }

    fn open_leaf(&self, node: usize, samples: Vec<usize>, depth: usize) -> OpenLeaf {
        let grad_sum: f64 = samples.iter().map(|&i| self.gradients[i]).sum();
        let split = self.best_split(&samples, grad_sum, depth);
        OpenLeaf {
            node,
            samples,
            grad_sum,
            depth,
            split,
        }
    }

    fn best_split(&self, samples: &[usize], grad_sum: f64, depth: usize) -> Option<BinSplit> {
        let min_leaf = self.params.min_samples_leaf;
        let n = samples.len();
        if self.params.max_depth.is_some_and(|max| depth >= max) || n < 2 * min_leaf {
            return None;
        }
        let lambda = self.params.l2_regularization;
        let parent = grad_sum * grad_sum / (n as f64 + lambda);
        let mut best: Option<BinSplit> = None;

        for (feature, edges) in self.bins.edges.iter().enumerate() {
            if edges.is_empty() {
                continue;
            }
            let n_bins = edges.len() + 1;
            let mut hist_grad = vec![0.0; n_bins];
            let mut hist_count = vec![0usize; n_bins];
            let codes = &self.bins.codes[feature];
            for &i in samples {
                let bin = usize::from(codes[i]);
                hist_grad[bin] += self.gradients[i];
                hist_count[bin] += 1;
            }

            let (mut left_grad, mut left_count) = (0.0, 0usize);
            for bin in 0..n_bins - 1 {
                left_grad += hist_grad[bin];
                left_count += hist_count[bin];
                let right_count = n - left_count;
                if left_count < min_leaf {
                    continue;
                }
                if right_count < min_leaf {
                    break;
                }
                let right_grad = grad_sum - left_grad;
                let gain = left_grad * left_grad / (left_count as f64 + lambda)
                    + right_grad * right_grad / (right_count as f64 + lambda)
                    - parent;
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(BinSplit { feature, bin, gain });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn quadratic(n: usize) -> (Array2<f64>, Vec<f64>) {
        let x = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { i as f64 / n as f64 } else { 1.0 });
        let y = (0..n).map(|i| (i as f64 / n as f64).powi(2) * 100.0).collect();
        (x, y)
    }

    #[test]
    fn boosting_reduces_training_error() {
        let (x, y) = quadratic(200);
        let mut model = HistGradientBoosting::new(
            BoostingParams {
                max_iter: 50,
                min_samples_leaf: 5,
                ..BoostingParams::default()
            },
            42,
        );
        model.fit(&x, &y).unwrap();
        assert_eq!(model.n_iter(), 50);
        let preds = model.predict(&x).unwrap();
        let baseline_rmse = crate::metrics::rmse(&y, &vec![mean(y.iter().copied()); y.len()]);
        assert!(crate::metrics::rmse(&y, &preds) < baseline_rmse * 0.2);
    }

    #[test]
    fn leaf_budget_and_min_leaf_are_respected() {
        let (x, y) = quadratic(100);
        let mut model = HistGradientBoosting::new(
            BoostingParams {
                max_iter: 3,
                max_leaf_nodes: Some(4),
                min_samples_leaf: 10,
                ..BoostingParams::default()
            },
            0,
        );
        model.fit(&x, &y).unwrap();
        assert!(model.trees.iter().all(|tree| tree.n_leaves() <= 4));
    }

    #[test]
    fn too_few_rows_for_a_split_predicts_the_mean() {
        let (x, y) = quadratic(10);
        let mut model = HistGradientBoosting::new(BoostingParams::default(), 0);
        model.fit(&x, &y).unwrap();
        let expected = mean(y.iter().copied());
        for pred in model.predict(&x).unwrap() {
            assert_relative_eq!(pred, expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn quantile_edges_cap_bin_count() {
        let column = ndarray::Array1::from_iter((0..1000_i32).map(f64::from));
        let edges = bin_edges(column.view(), 16);
        assert!(edges.len() <= 15);
        assert!(edges.windows(2).all(|pair| pair[0] < pair[1]));
        let few = ndarray::array![3.0, 1.0, 2.0, 2.0];
        assert_eq!(bin_edges(few.view(), 255), [1.5, 2.5]);
    }

    #[test]
    fn params_are_validated() {
        let parsed: Result<BoostingParams, _> =
            serde_json::from_value(serde_json::json!({ "max_iter": 10, "loss": "absolute" }));
        assert!(parsed.is_err());
        let bad = BoostingParams {
            max_bins: 1000,
            ..BoostingParams::default()
        };
        assert!(bad.validate().is_err());
        assert!(BoostingParams::default().validate().is_ok());
    }
}
