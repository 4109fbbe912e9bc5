//! Regression estimators selectable from the params file.
//!
//! Every estimator is constructed from a model spec's `type` plus its free-form
//! hyperparameters, fitted on a dense feature matrix, and serialized whole into
//! the model artifact.

use std::{fmt, str::FromStr};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LearningError;

/// Random forest regressor.
pub mod forest;
/// Histogram gradient boosting regressor.
pub mod hist_gb;
/// Least-squares linear regressor.
pub mod linear;
/// CART regression trees shared by the ensembles.
pub mod tree;

pub use forest::{ForestParams, MaxFeatures, MaxFeaturesRule, RandomForest};
pub use hist_gb::{BoostingParams, HistGradientBoosting};
pub use linear::LinearRegression;
pub use tree::{RegressionTree, TreeNode};

/// Supported estimator types, as written in a model spec's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// `linear`
    Linear,
    /// `random_forest`
    RandomForest,
    /// `hist_gradient_boosting`
    HistGradientBoosting,
}

impl ModelKind {
    /// Every supported type.
    pub const ALL: [Self; 3] = [Self::Linear, Self::RandomForest, Self::HistGradientBoosting];

    /// Params-file spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::RandomForest => "random_forest",
            Self::HistGradientBoosting => "hist_gradient_boosting",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = LearningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| LearningError::UnknownModelType(s.to_string()))
    }
}

/// A configured estimator of any supported type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Estimator {
    /// Linear regression.
    Linear(LinearRegression),
    /// Random forest.
    RandomForest(RandomForest),
    /// Histogram gradient boosting.
    HistGradientBoosting(HistGradientBoosting),
}

impl Estimator {
    /// Estimator type.
    #[must_use]
    pub const fn kind(&self) -> ModelKind {
        match self {
            Self::Linear(_) => ModelKind::Linear,
            Self::RandomForest(_) => ModelKind::RandomForest,
            Self::HistGradientBoosting(_) => ModelKind::HistGradientBoosting,
        }
    }

    /// Fits on `x` (rows × features) against `y`.
    pub fn fit(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<(), LearningError> {
        match self {
            Self::Linear(model) => model.fit(x, y),
            Self::RandomForest(model) => model.fit(x, y),
            Self::HistGradientBoosting(model) => model.fit(x, y),
        }
    }

    /// One prediction per row of `x`.
    pub fn predict(&self, x: &Array2<f64>) -> Result<Vec<f64>, LearningError> {
        match self {
            Self::Linear(model) => model.predict(x),
            Self::RandomForest(model) => model.predict(x),
            Self::HistGradientBoosting(model) => model.predict(x),
        }
    }
}

/// Builds an unfitted estimator from a model spec. Unknown hyperparameter keys
/// and out-of-range values are rejected before any data is touched; the linear
/// model takes no hyperparameters and ignores any given.
pub fn build_model(
    model_type: &str,
    params: &Map<String, Value>,
    random_state: u64,
) -> Result<Estimator, LearningError> {
    let kind: ModelKind = model_type.parse()?;
    match kind {
        ModelKind::Linear => Ok(Estimator::Linear(LinearRegression::new())),
        ModelKind::RandomForest => {
            let parsed: ForestParams = parse_params(kind, params)?;
            parsed.validate()?;
            Ok(Estimator::RandomForest(RandomForest::new(parsed, random_state)))
        }
        ModelKind::HistGradientBoosting => {
            let parsed: BoostingParams = parse_params(kind, params)?;
            parsed.validate()?;
            Ok(Estimator::HistGradientBoosting(HistGradientBoosting::new(
                parsed,
                random_state,
            )))
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(
    kind: ModelKind,
    params: &Map<String, Value>,
) -> Result<T, LearningError> {
    serde_json::from_value(Value::Object(params.clone()))
        .map_err(|err| invalid(kind.as_str(), err.to_string()))
}

pub(crate) fn invalid(model_type: &str, message: impl Into<String>) -> LearningError {
    LearningError::InvalidParams {
        model_type: model_type.to_string(),
        message: message.into(),
    }
}

pub(crate) fn check_fit_input(x: &Array2<f64>, y: &[f64]) -> Result<(), LearningError> {
    if x.nrows() == 0 {
        return Err(LearningError::EmptyDataset);
    }
    if x.nrows() != y.len() {
        return Err(LearningError::LengthMismatch {
            rows: x.nrows(),
            targets: y.len(),
        });
    }
    Ok(())
}

pub(crate) fn check_width(x: &Array2<f64>, fitted: Option<usize>) -> Result<(), LearningError> {
    let expected = fitted.ok_or(LearningError::NotFitted)?;
    if x.ncols() == expected {
        Ok(())
    } else {
        Err(LearningError::FeatureMismatch {
            actual: x.ncols(),
            expected,
        })
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;
    use serde_json::json;

    use super::*;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = build_model("xgboost", &Map::new(), 0).unwrap_err();
        assert!(matches!(err, LearningError::UnknownModelType(name) if name == "xgboost"));
    }

    #[test]
    fn bad_hyperparameters_surface_as_invalid_params() {
        let err = build_model("random_forest", &params(json!({ "n_trees": 5 })), 0).unwrap_err();
        assert!(matches!(
            err,
            LearningError::InvalidParams { ref model_type, .. } if model_type == "random_forest"
        ));
        let err =
            build_model("hist_gradient_boosting", &params(json!({ "learning_rate": -1.0 })), 0)
                .unwrap_err();
        assert!(matches!(err, LearningError::InvalidParams { .. }));
    }

    #[test]
    fn linear_ignores_params_and_estimators_round_trip_through_json() {
        let mut model = build_model("linear", &params(json!({ "fit_intercept": true })), 0).unwrap();
        assert_eq!(model.kind(), ModelKind::Linear);

        let x = Array2::from_shape_fn((6, 1), |(i, _)| i as f64);
        let y: Vec<f64> = (0..6_i32).map(|i| 2.0 * f64::from(i) + 1.0).collect();
        model.fit(&x, &y).unwrap();

        let encoded = serde_json::to_value(&model).unwrap();
        assert_eq!(encoded["type"], "linear");
        let decoded: Estimator = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded.kind(), ModelKind::Linear);
        for (a, b) in decoded.predict(&x).unwrap().iter().zip(model.predict(&x).unwrap()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn fit_input_checks() {
        let empty = Array2::<f64>::zeros((0, 2));
        assert!(matches!(check_fit_input(&empty, &[]), Err(LearningError::EmptyDataset)));
        let x = Array2::<f64>::zeros((3, 2));
        assert!(matches!(
            check_fit_input(&x, &[1.0]),
            Err(LearningError::LengthMismatch { rows: 3, targets: 1 })
        ));
        assert_eq!("random_forest".parse::<ModelKind>().unwrap(), ModelKind::RandomForest);
    }
}
