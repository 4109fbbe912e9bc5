use serde::{Deserialize, Serialize};

/// Mean absolute error.
#[must_use]
pub fn mae(y_true: &[f64], y_pred: &[f64]) -> f64 {
    mean(y_true.iter().zip(y_pred).map(|(t, p)| (t - p).abs()))
}

/// Root mean squared error.
#[must_use]
pub fn rmse(y_true: &[f64], y_pred: &[f64]) -> f64 {
    mean(y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2))).sqrt()
}

/// Coefficient of determination; 0 when the targets are constant.
#[must_use]
pub fn r2(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let y_mean = mean(y_true.iter().copied());
    let ss_res: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)).sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - y_mean).powi(2)).sum();
    if ss_tot == 0.0 {
        0.0
    } else {
        1.0 - ss_res / ss_tot
    }
}

/// Arithmetic mean; 0 for an empty sequence.
#[must_use]
pub fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Held-out scores for one fold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FoldMetrics {
    /// 1-based fold number.
    pub fold: usize,
    /// Mean absolute error.
    pub mae: f64,
    /// Root mean squared error.
    pub rmse: f64,
    /// Coefficient of determination.
    pub r2: f64,
}

impl FoldMetrics {
    /// Scores predictions for fold `fold`.
    #[must_use]
    pub fn score(fold: usize, y_true: &[f64], y_pred: &[f64]) -> Self {
        Self {
            fold,
            mae: mae(y_true, y_pred),
            rmse: rmse(y_true, y_pred),
            r2: r2(y_true, y_pred),
        }
    }
}

/// Summary of one training run. Built once and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Configured model name.
    pub model_name: String,
    /// Estimator type.
    pub model_type: String,
    /// Run start, RFC 3339 UTC.
    pub started_at_utc: String,
    /// Wall-clock duration in seconds.
    pub duration_s: f64,
    /// Number of folds.
    pub cv_folds: usize,
    /// Per-fold scores, in fold order.
    pub fold_metrics: Vec<FoldMetrics>,
    /// Mean MAE over folds.
    pub mean_mae: f64,
    /// Mean RMSE over folds.
    pub mean_rmse: f64,
    /// Mean R² over folds.
    pub mean_r2: f64,
}
