//! Interquartile-range clamp for numeric features.

use serde::{Deserialize, Serialize};
use spi_data::Table;

use crate::error::LearningError;

/// Clamp method understood by [`OutlierConfig::applies`].
pub const IQR_CLIP: &str = "iqr_clip";

/// `data.outliers` block of the params file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    /// Master switch.
    pub enabled: bool,
    /// Clamp method; only `iqr_clip` does anything.
    pub method: String,
    /// Fence multiplier.
    pub k: f64,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: IQR_CLIP.to_string(),
            k: 1.5,
        }
    }
}

impl OutlierConfig {
    /// Whether the clamp should run before training.
    #[must_use]
    pub fn applies(&self) -> bool {
        self.enabled && self.method == IQR_CLIP
    }

    /// Rejects a fence multiplier that is negative or NaN.
    pub fn validate(&self) -> Result<(), LearningError> {
        if self.k.is_finite() && self.k >= 0.0 {
            Ok(())
        } else {
            Err(LearningError::InvalidOutlierFence(self.k))
        }
    }
}

/// Linearly interpolated percentile (`pct` in 0..=100) of ascending `sorted`.
#[must_use]
pub fn percentile(sorted: &[f64], pct: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = (pct / 100.0).clamp(0.0, 1.0) * last as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

/// Returns a copy of `table` with each listed column clipped to
/// `[Q1 - k·IQR, Q3 + k·IQR]`. Absent columns and columns whose IQR is zero
/// or not finite are left as they were, as is every column when `k` yields
/// an empty or NaN fence.
#[must_use]
pub fn iqr_clip(table: &Table, numeric_columns: &[String], k: f64) -> Table {
    let mut clipped = table.clone();
    for name in numeric_columns {
        let Some(column) = table.column(name) else {
            continue;
        };
        let mut observed: Vec<f64> = column.to_numbers().into_iter().flatten().collect();
        observed.sort_by(f64::total_cmp);
        let (Some(q1), Some(q3)) = (percentile(&observed, 25.0), percentile(&observed, 75.0)) else {
            continue;
        };
        let iqr = q3 - q1;
        if !iqr.is_finite() || iqr == 0.0 {
            continue;
        }
        let (lo, hi) = (k.mul_add(-iqr, q1), k.mul_add(iqr, q3));
        if lo.is_nan() || hi.is_nan() || lo > hi {
            continue;
        }
        clipped.map_numbers(name, |value| Some(value.clamp(lo, hi)));
    }
    clipped
}
