use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::LearningError;

use super::{check_fit_input, check_width};

/// Ridge penalty per standardized column, relative to the row count. Small
/// enough to leave well-posed fits unchanged, large enough to pick the
/// minimum-norm solution when one-hot columns are collinear with the
/// intercept.
const RIDGE: f64 = 1e-8;

/// Ordinary least squares with intercept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearRegression {
    coefficients: Vec<f64>,
    intercept: f64,
    n_features: Option<usize>,
}

impl LinearRegression {
    /// Unfitted model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Coefficients in input-column order.
    #[must_use]
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Fitted intercept.
    #[must_use]
    pub const fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Solves the normal equations on standardized columns. Constant columns
    /// get a zero coefficient.
    pub fn fit(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<(), LearningError> {
        check_fit_input(x, y)?;
        let (n_rows, n_features) = x.dim();
        let means = x.mean_axis(Axis(0)).ok_or(LearningError::EmptyDataset)?;
        let stds = x.std_axis(Axis(0), 0.0);
        let active: Vec<usize> = (0..n_features).filter(|&j| stds[j] > 1e-12).collect();

        let y_mean = y.iter().sum::<f64>() / n_rows as f64;
        let centered_y = Array1::from_iter(y.iter().map(|v| v - y_mean));
        let z = Array2::from_shape_fn((n_rows, active.len()), |(i, k)| {
            let j = active[k];
            (x[[i, j]] - means[j]) / stds[j]
        });

        let mut gram = z.t().dot(&z);
        let penalty = RIDGE * n_rows as f64;
        for k in 0..active.len() {
            gram[[k, k]] += penalty;
        }
        let rhs = z.t().dot(&centered_y);
        let beta = cholesky_solve(gram, rhs).ok_or(LearningError::SingularSystem)?;

        let mut coefficients = vec![0.0; n_features];
        for (k, &j) in active.iter().enumerate() {
            coefficients[j] = beta[k] / stds[j];
        }
        self.intercept = y_mean
            - coefficients
                .iter()
                .zip(means.iter())
                .map(|(w, m)| w * m)
                .sum::<f64>();
        self.coefficients = coefficients;
        self.n_features = Some(n_features);
        Ok(())
    }

    /// `x · w + b` per row.
    pub fn predict(&self, x: &Array2<f64>) -> Result<Vec<f64>, LearningError> {
        check_width(x, self.n_features)?;
        let weights = Array1::from(self.coefficients.clone());
        Ok((x.dot(&weights) + self.intercept).to_vec())
    }
}

/// Solves `a · β = b` for symmetric positive definite `a`.
fn cholesky_solve(a: Array2<f64>, b: Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let dot: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                let diag = a[[i, i]] - dot;
                if diag <= 0.0 || !diag.is_finite() {
                    return None;
                }
                l[[i, i]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - dot) / l[[j, j]];
            }
        }
    }

    let mut forward = Array1::<f64>::zeros(n);
    for i in 0..n {
        let dot: f64 = (0..i).map(|k| l[[i, k]] * forward[k]).sum();
        forward[i] = (b[i] - dot) / l[[i, i]];
    }
    let mut beta = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let dot: f64 = (i + 1..n).map(|k| l[[k, i]] * beta[k]).sum();
        beta[i] = (forward[i] - dot) / l[[i, i]];
    }
    Some(beta)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use ndarray::array;

    use super::*;

    #[test]
    fn recovers_exact_linear_relationship() {
        let x = array![[1.0, 2.0], [2.0, 1.0], [3.0, 5.0], [4.0, 3.0], [5.0, 8.0]];
        let y: Vec<f64> = x.rows().into_iter().map(|r| 3.0 * r[0] - 2.0 * r[1] + 5.0).collect();
        let mut model = LinearRegression::new();
        model.fit(&x, &y).unwrap();
        assert_relative_eq!(model.coefficients()[0], 3.0, epsilon = 1e-4);
        assert_relative_eq!(model.coefficients()[1], -2.0, epsilon = 1e-4);
        assert_relative_eq!(model.intercept(), 5.0, epsilon = 1e-3);
        for (pred, target) in model.predict(&x).unwrap().iter().zip(&y) {
            assert_relative_eq!(pred, target, epsilon = 1e-3);
        }
    }

    #[test]
    fn collinear_one_hot_columns_still_fit() {
        // Two one-hot columns always sum to one, duplicating the intercept.
        let x = array![[1.0, 0.0], [1.0, 0.0], [0.0, 1.0], [0.0, 1.0]];
        let y = [10.0, 12.0, 20.0, 22.0];
        let mut model = LinearRegression::new();
        model.fit(&x, &y).unwrap();
        let preds = model.predict(&x).unwrap();
        assert_relative_eq!(preds[0], 11.0, epsilon = 1e-4);
        assert_relative_eq!(preds[2], 21.0, epsilon = 1e-4);
        // An all-zero row (unseen category) stays finite.
        let unseen = model.predict(&array![[0.0, 0.0]]).unwrap();
        assert!(unseen[0].is_finite());
    }

    #[test]
    fn constant_columns_are_ignored() {
        let x = array![[1.0, 7.0], [2.0, 7.0], [3.0, 7.0]];
        let mut model = LinearRegression::new();
        model.fit(&x, &[2.0, 4.0, 6.0]).unwrap();
        assert_eq!(model.coefficients()[1], 0.0);
        assert_relative_eq!(model.predict(&array![[4.0, 7.0]]).unwrap()[0], 8.0, epsilon = 1e-6);
    }
}
