use std::{
    fs,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use spi_data::PrepareOptions;

use crate::{error::LearningError, outliers::OutlierConfig};

/// Training parameters loaded from `params.json` (or `.toml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainParams {
    /// Dataset locations and feature lists.
    pub data: DataConfig,
    /// Cross-validation settings.
    #[serde(default)]
    pub train: TrainConfig,
    /// Named model specs, in file order.
    #[serde(default)]
    pub models: IndexMap<String, ModelSpec>,
    /// Where fitted artifacts go.
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    /// Where metric reports go.
    #[serde(default)]
    pub reports: ReportsConfig,
    /// Directory relative paths resolve against.
    #[serde(skip)]
    pub root: PathBuf,
}

/// `data` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Flat export consumed by `prepare`.
    #[serde(default = "default_raw_csv")]
    pub raw_csv: PathBuf,
    /// Processed training CSV.
    #[serde(default = "default_train_csv")]
    pub train_csv: PathBuf,
    /// Dataset summary written by `prepare`.
    #[serde(default = "default_summary_json")]
    pub summary_json: PathBuf,
    /// Canonical name -> raw export column.
    #[serde(default)]
    pub column_map: IndexMap<String, String>,
    /// Regression target.
    #[serde(default = "default_target_col")]
    pub target_col: String,
    /// Multiplier applied to the target during preparation.
    #[serde(default = "default_target_scale")]
    pub target_scale: f64,
    /// Median-imputed numeric features.
    pub numeric_features: Vec<String>,
    /// One-hot encoded categorical features.
    pub categorical_features: Vec<String>,
    /// Training-time outlier clamp.
    #[serde(default)]
    pub outliers: OutlierConfig,
}

/// `train` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Seed for fold shuffling and stochastic estimators.
    pub random_state: u64,
    /// Number of cross-validation folds.
    pub cv_folds: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            random_state: 42,
            cv_folds: 5,
        }
    }
}

/// One entry of the `models` section: a `type` plus free-form hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Estimator type (`linear`, `random_forest`, `hist_gradient_boosting`).
    #[serde(rename = "type")]
    pub model_type: String,
    /// Every other key of the entry.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

/// `artifacts` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    /// Output directory.
    pub dir: PathBuf,
    /// File prefix for fitted estimators.
    pub model_prefix: String,
    /// File prefix for fitted pipelines.
    pub preprocessor_prefix: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models"),
            model_prefix: "model_".to_string(),
            preprocessor_prefix: "preprocessor_".to_string(),
        }
    }
}

/// `reports` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportsConfig {
    /// Metrics report directory.
    pub dir: PathBuf,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("reports/metrics"),
        }
    }
}

fn default_raw_csv() -> PathBuf {
    PathBuf::from("data/raw/scb.csv")
}

fn default_train_csv() -> PathBuf {
    PathBuf::from("data/processed/train.csv")
}

fn default_summary_json() -> PathBuf {
    PathBuf::from("reports/data/summary.json")
}

fn default_target_col() -> String {
    "price_per_sqm".to_string()
}

const fn default_target_scale() -> f64 {
    1.0
}

impl TrainParams {
    /// Reads a params file. `.toml` files are parsed as TOML, anything else as
    /// JSON. Relative paths inside resolve against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LearningError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(LearningError::io(path))?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let parsed: Result<Self, String> = if is_toml {
            toml::from_str(&text).map_err(|err| err.to_string())
        } else {
            serde_json::from_str(&text).map_err(|err| err.to_string())
        };
        let mut params = parsed.map_err(|message| LearningError::Params {
            path: path.to_path_buf(),
            message,
        })?;
        params.data.outliers.validate().map_err(|err| LearningError::Params {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        params.root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(params)
    }

    /// Same parameters, rooted at `root`.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Resolves `relative` against the params root; absolute paths pass
    /// through.
    #[must_use]
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    /// Names of the configured models, in file order.
    #[must_use]
    pub fn model_names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    /// Options for the dataset preparer: every configured feature is required.
    #[must_use]
    pub fn prepare_options(&self) -> PrepareOptions {
        PrepareOptions {
            column_map: self.data.column_map.clone(),
            required_features: self
                .data
                .numeric_features
                .iter()
                .chain(&self.data.categorical_features)
                .cloned()
                .collect(),
            target_col: self.data.target_col.clone(),
            target_scale: self.data.target_scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    const PARAMS: &str = r#"{
        "data": {
            "train_csv": "data/processed/train.csv",
            "target_col": "price_per_sqm",
            "numeric_features": ["area", "rooms"],
            "categorical_features": ["district"],
            "outliers": { "k": 3.0 }
        },
        "train": { "cv_folds": 3 },
        "models": {
            "baseline": { "type": "linear" },
            "rf": { "type": "random_forest", "n_estimators": 50, "max_depth": 8 }
        }
    }"#;

    #[test]
    fn json_params_fill_defaults_and_split_model_specs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params.json");
        fs::write(&path, PARAMS).unwrap();
        let params = TrainParams::load(&path).unwrap();

        assert_eq!(params.train.random_state, 42);
        assert_eq!(params.train.cv_folds, 3);
        assert!(params.data.outliers.enabled);
        assert_eq!(params.data.outliers.method, "iqr_clip");
        assert_eq!(params.data.outliers.k, 3.0);
        assert_eq!(params.model_names(), vec!["baseline", "rf"]);

        let rf = &params.models["rf"];
        assert_eq!(rf.model_type, "random_forest");
        assert_eq!(rf.params.len(), 2);
        assert!(!rf.params.contains_key("type"));

        assert_eq!(params.artifacts.model_prefix, "model_");
        assert_eq!(
            params.resolve(&params.data.train_csv),
            dir.path().join("data/processed/train.csv")
        );
        let options = params.prepare_options();
        assert_eq!(options.required_features, vec!["area", "rooms", "district"]);
    }

    #[test]
    fn toml_params_are_accepted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params.toml");
        fs::write(
            &path,
            r#"
[data]
numeric_features = ["area"]
categorical_features = ["district"]

[models.gbr]
type = "hist_gradient_boosting"
learning_rate = 0.05
"#,
        )
        .unwrap();
        let params = TrainParams::load(&path).unwrap();
        assert_eq!(params.models["gbr"].model_type, "hist_gradient_boosting");
        assert_eq!(params.models["gbr"].params["learning_rate"], 0.05);
        assert_eq!(params.reports.dir, PathBuf::from("reports/metrics"));
    }

    #[test]
    fn negative_outlier_fence_is_a_params_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params.json");
        fs::write(
            &path,
            r#"{
                "data": {
                    "numeric_features": ["area"],
                    "categorical_features": [],
                    "outliers": { "k": -1.0 }
                }
            }"#,
        )
        .unwrap();
        let err = TrainParams::load(&path).unwrap_err();
        assert!(
            matches!(err, LearningError::Params { ref message, .. } if message.contains("outliers.k"))
        );
    }

    #[test]
    fn malformed_params_name_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params.json");
        fs::write(&path, "{ \"data\": {} }").unwrap();
        let err = TrainParams::load(&path).unwrap_err();
        assert!(matches!(err, LearningError::Params { path: ref p, .. } if p == &path));
    }
}
