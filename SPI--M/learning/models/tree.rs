use ndarray::{Array2, ArrayView1};
use rand::{rngs::StdRng, seq::index::sample};
use serde::{Deserialize, Serialize};

/// Node of an arena-allocated regression tree. Rows with
/// `x[feature] <= threshold` go left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    /// Internal split.
    Split {
        /// Feature column.
        feature: usize,
        /// Split value.
        threshold: f64,
        /// Arena index of the left child.
        left: usize,
        /// Arena index of the right child.
        right: usize,
    },
    /// Terminal prediction.
    Leaf {
        /// Predicted value.
        value: f64,
    },
}

/// Regression tree stored as a node arena rooted at index 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

impl RegressionTree {
    pub(crate) fn from_nodes(nodes: Vec<TreeNode>) -> Self {
        Self { nodes }
    }

    /// Prediction for one feature row.
    #[must_use]
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => idx = if row[*feature] <= *threshold { *left } else { *right },
                Some(TreeNode::Leaf { value }) => return *value,
                None => return 0.0,
            }
        }
    }

    /// Number of leaves.
    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| matches!(node, TreeNode::Leaf { .. }))
            .count()
    }

    /// Longest root-to-leaf path, in splits.
    #[must_use]
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(TreeNode::Split { left, right, .. }) => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Growth limits for a CART regression tree.
#[derive(Debug, Clone, Copy)]
pub struct CartConfig {
    /// Maximum depth; unlimited when `None`.
    pub max_depth: Option<usize>,
    /// Minimum rows a node needs before it may split.
    pub min_samples_split: usize,
    /// Minimum rows on each side of a split.
    pub min_samples_leaf: usize,
    /// Features examined per split.
    pub max_features: usize,
}

struct Split {
    feature: usize,
    threshold: f64,
    score: f64,
}

/// Grows a variance-reduction CART tree over the rows in `samples`
/// (duplicates allowed, as produced by bootstrapping).
pub fn grow_cart(
    x: &Array2<f64>,
    y: &[f64],
    samples: Vec<usize>,
    config: &CartConfig,
    rng: &mut StdRng,
) -> RegressionTree {
    let mut builder = CartBuilder {
        x,
        y,
        config,
        rng,
        nodes: Vec::new(),
    };
    builder.grow(samples, 0);
    RegressionTree::from_nodes(builder.nodes)
}

struct CartBuilder<'a> {
    x: &'a Array2<f64>,
    y: &'a [f64],
    config: &'a CartConfig,
    rng: &'a mut StdRng,
    nodes: Vec<TreeNode>,
}

impl CartBuilder<'_> {
    fn grow(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let node = self.nodes.len();
        let total: f64 = samples.iter().map(|&i| self.y[i]).sum();
        let n = samples.len();
        self.nodes.push(TreeNode::Leaf {
            value: if n == 0 { 0.0 } else { total / n as f64 },
        });

        let depth_left = self.config.max_depth.map_or(true, |max| depth < max);
        if !depth_left || n < self.config.min_samples_split || n < 2 * self.config.min_samples_leaf
        {
            return node;
        }
        let first = self.y[samples[0]];
        if samples.iter().all(|&i| self.y[i] == first) {
            return node;
        }

        let n_features = self.x.ncols();
        if n_features == 0 {
            return node;
        }
        let k = self.config.max_features.clamp(1, n_features);
        let features = sample(&mut *self.rng, n_features, k).into_vec();
        let Some(split) = self.best_split(&samples, &features, total) else {
            return node;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&i| self.x[[i, split.feature]] <= split.threshold);
        let left = self.grow(left, depth + 1);
        let right = self.grow(right, depth + 1);
        self.nodes[node] = TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node
    }

    fn best_split(&self, samples: &[usize], features: &[usize], total: f64) -> Option<Split> {
        let n = samples.len();
        let min_leaf = self.config.min_samples_leaf.max(1);
        let parent = total * total / n as f64;
        let mut best: Option<Split> = None;
        let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(n);

        for &feature in features {
            pairs.clear();
            pairs.extend(samples.iter().map(|&i| (self.x[[i, feature]], self.y[i])));
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_sum = 0.0;
            for i in 1..n {
                left_sum += pairs[i - 1].1;
                if i < min_leaf || n - i < min_leaf || pairs[i - 1].0 >= pairs[i].0 {
                    continue;
                }
                let right_sum = total - left_sum;
                let score = left_sum * left_sum / i as f64 + right_sum * right_sum / (n - i) as f64;
                if best.as_ref().map_or(true, |b| score > b.score) {
                    let (lo, hi) = (pairs[i - 1].0, pairs[i].0);
                    let mid = lo + (hi - lo) / 2.0;
                    best = Some(Split {
                        feature,
                        threshold: if mid < hi { mid } else { lo },
                        score,
                    });
                }
            }
        }
        best.filter(|split| split.score - parent > 1e-12 * parent.abs().max(1.0))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand::SeedableRng;

    use super::*;

    fn config() -> CartConfig {
        CartConfig {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: 2,
        }
    }

    #[test]
    fn fits_a_step_function_exactly() {
        let x = array![[1.0, 0.0], [2.0, 0.0], [3.0, 1.0], [4.0, 1.0]];
        let y = [10.0, 10.0, 20.0, 20.0];
        let tree = grow_cart(&x, &y, (0..4).collect(), &config(), &mut StdRng::seed_from_u64(1));
        assert_eq!(tree.n_leaves(), 2);
        for (row, expected) in x.rows().into_iter().zip(y) {
            assert_eq!(tree.predict_row(row), expected);
        }
        assert_eq!(tree.predict_row(array![2.6, 1.0].view()), 20.0);
    }

    #[test]
    fn depth_and_leaf_limits_hold() {
        let x = Array2::from_shape_fn((16, 1), |(i, _)| i as f64);
        let y: Vec<f64> = (0..16_i32).map(|i| f64::from(i * i)).collect();
        let shallow = CartConfig {
            max_depth: Some(2),
            ..config()
        };
        let tree = grow_cart(&x, &y, (0..16).collect(), &shallow, &mut StdRng::seed_from_u64(1));
        assert!(tree.depth() <= 2);

        let chunky = CartConfig {
            min_samples_leaf: 8,
            ..config()
        };
        let tree = grow_cart(&x, &y, (0..16).collect(), &chunky, &mut StdRng::seed_from_u64(1));
        assert_eq!(tree.n_leaves(), 2);
    }

    #[test]
    fn constant_target_is_a_single_leaf() {
        let x = array![[1.0], [2.0], [3.0]];
        let tree = grow_cart(&x, &[5.0; 3], vec![0, 1, 2], &config(), &mut StdRng::seed_from_u64(1));
        assert_eq!(tree.n_leaves(), 1);
        assert_eq!(tree.depth(), 0);
    }
}
