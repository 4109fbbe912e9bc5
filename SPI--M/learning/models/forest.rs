use ndarray::Array2;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::LearningError;

use super::{
    check_fit_input, check_width, invalid,
    tree::{grow_cart, CartConfig, RegressionTree},
};

/// Named feature-count rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaxFeaturesRule {
    /// √n features.
    Sqrt,
    /// log₂ n features.
    Log2,
}

/// Features considered at each split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxFeatures {
    /// Absolute count.
    Count(usize),
    /// Fraction of the feature count, in `(0, 1]`.
    Fraction(f64),
    /// `"sqrt"` or `"log2"`.
    Rule(MaxFeaturesRule),
}

impl MaxFeatures {
    fn resolve(self, n_features: usize) -> usize {
        let n = n_features as f64;
        let k = match self {
            Self::Count(count) => count,
            Self::Fraction(fraction) => (fraction * n).floor() as usize,
            Self::Rule(MaxFeaturesRule::Sqrt) => n.sqrt().floor() as usize,
            Self::Rule(MaxFeaturesRule::Log2) => n.log2().floor() as usize,
        };
        k.clamp(1, n_features.max(1))
    }
}

/// Random forest hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForestParams {
    /// Number of trees.
    pub n_estimators: usize,
    /// Depth limit per tree.
    pub max_depth: Option<usize>,
    /// Minimum rows before a node may split.
    pub min_samples_split: usize,
    /// Minimum rows per leaf.
    pub min_samples_leaf: usize,
    /// Features per split; all features when `None`.
    pub max_features: Option<MaxFeatures>,
    /// Draw a bootstrap sample per tree.
    pub bootstrap: bool,
    /// Accepted for params-file compatibility; trees are grown sequentially.
    pub n_jobs: Option<i64>,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: Some(MaxFeatures::Fraction(1.0)),
            bootstrap: true,
            n_jobs: None,
        }
    }
}

impl ForestParams {
    pub(crate) fn validate(&self) -> Result<(), LearningError> {
        const TYPE: &str = "random_forest";
        if self.n_estimators == 0 {
            return Err(invalid(TYPE, "n_estimators must be at least 1"));
        }
        if self.min_samples_split < 2 {
            return Err(invalid(TYPE, "min_samples_split must be at least 2"));
        }
        if self.min_samples_leaf == 0 {
            return Err(invalid(TYPE, "min_samples_leaf must be at least 1"));
        }
        if self.max_depth == Some(0) {
            return Err(invalid(TYPE, "max_depth must be at least 1"));
        }
        match self.max_features {
            Some(MaxFeatures::Count(0)) => Err(invalid(TYPE, "max_features must be at least 1")),
            Some(MaxFeatures::Fraction(f)) if !(f > 0.0 && f <= 1.0) => {
                Err(invalid(TYPE, "max_features fraction must be in (0, 1]"))
            }
            _ => Ok(()),
        }
    }
}

/// Bagged ensemble of CART regression trees; predicts the tree average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    random_state: u64,
    trees: Vec<RegressionTree>,
    n_features: Option<usize>,
}

impl RandomForest {
    /// Unfitted forest.
    #[must_use]
    pub fn new(params: ForestParams, random_state: u64) -> Self {
        Self {
            params,
            random_state,
            trees: Vec::new(),
            n_features: None,
        }
    }

    /// Hyperparameters.
    #[must_use]
    pub const fn params(&self) -> &ForestParams {
        &self.params
    }

    /// Fitted trees.
    #[must_use]
    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    /// Grows `n_estimators` trees, each from its own seeded stream.
    pub fn fit(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<(), LearningError> {
        check_fit_input(x, y)?;
        let (n_rows, n_features) = x.dim();
        let config = CartConfig {
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features: self
                .params
                .max_features
                .map_or(n_features, |rule| rule.resolve(n_features)),
        };

        let mut seeds = StdRng::seed_from_u64(self.random_state);
        self.trees = (0..self.params.n_estimators)
            .map(|_| {
                let mut rng = StdRng::seed_from_u64(seeds.gen());
                let samples: Vec<usize> = if self.params.bootstrap {
                    (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect()
                } else {
                    (0..n_rows).collect()
                };
                grow_cart(x, y, samples, &config, &mut rng)
            })
            .collect();
        self.n_features = Some(n_features);
        Ok(())
    }

    /// Mean of the tree predictions per row.
    pub fn predict(&self, x: &Array2<f64>) -> Result<Vec<f64>, LearningError> {
        check_width(x, self.n_features)?;
        let n_trees = self.trees.len() as f64;
        Ok(x.rows()
            .into_iter()
            .map(|row| self.trees.iter().map(|tree| tree.predict_row(row)).sum::<f64>() / n_trees)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;

    fn step_data() -> (Array2<f64>, Vec<f64>) {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 3) as f64 });
        let y = (0..40).map(|i| if i < 20 { 100.0 } else { 300.0 }).collect();
        (x, y)
    }

    #[test]
    fn params_reject_unknown_keys_and_bad_values() {
        let parsed: Result<ForestParams, _> =
            serde_json::from_value(serde_json::json!({ "n_estimators": 10, "colour": "red" }));
        assert!(parsed.is_err());

        let parsed: ForestParams = serde_json::from_value(serde_json::json!({
            "n_estimators": 10,
            "max_features": "sqrt",
            "n_jobs": -1
        }))
        .unwrap();
        assert_eq!(parsed.max_features, Some(MaxFeatures::Rule(MaxFeaturesRule::Sqrt)));
        assert!(parsed.validate().is_ok());

        let bad = ForestParams {
            min_samples_split: 1,
            ..ForestParams::default()
        };
        assert!(matches!(bad.validate(), Err(LearningError::InvalidParams { .. })));
    }

    #[test]
    fn max_features_rules_resolve() {
        assert_eq!(MaxFeatures::Fraction(1.0).resolve(42), 42);
        assert_eq!(MaxFeatures::Fraction(0.5).resolve(42), 21);
        assert_eq!(MaxFeatures::Rule(MaxFeaturesRule::Sqrt).resolve(42), 6);
        assert_eq!(MaxFeatures::Rule(MaxFeaturesRule::Log2).resolve(42), 5);
        assert_eq!(MaxFeatures::Count(100).resolve(42), 42);
    }

    #[test]
    fn learns_a_step_and_is_reproducible() {
        let (x, y) = step_data();
        let params = ForestParams {
            n_estimators: 15,
            ..ForestParams::default()
        };
        let mut forest = RandomForest::new(params.clone(), 42);
        forest.fit(&x, &y).unwrap();
        let preds = forest.predict(&x).unwrap();
        assert!(preds[2] < 150.0);
        assert!(preds[37] > 250.0);

        let mut again = RandomForest::new(params, 42);
        again.fit(&x, &y).unwrap();
        assert_eq!(again, forest);
    }

    #[test]
    fn predict_requires_fit_and_matching_width() {
        let (x, y) = step_data();
        let mut forest = RandomForest::new(ForestParams::default(), 0);
        assert!(matches!(forest.predict(&x), Err(LearningError::NotFitted)));
        forest.params.n_estimators = 3;
        forest.fit(&x, &y).unwrap();
        let narrow = Array2::<f64>::zeros((1, 1));
        assert!(matches!(
            forest.predict(&narrow),
            Err(LearningError::FeatureMismatch { actual: 1, expected: 2 })
        ));
    }
}
