//! Cross-validated training runs.
//!
//! A run moves through `Loaded → (Split → Fit → Score)* → Aggregated →
//! FullFit → Persisted`. Each fold gets a freshly fitted pipeline and a fresh
//! estimator so no held-out statistics leak into training. The configuration
//! is validated before the training CSV is read.

use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::{read_json_lines, JsonLinesWriter};
use spi_data::Table;

use crate::{
    artifacts::{save_json_atomic, ModelArtifact, PreprocessorArtifact},
    config::TrainParams,
    error::LearningError,
    kfold::KFold,
    metrics::{mean, FoldMetrics, RunMetrics},
    models::build_model,
    outliers::iqr_clip,
    preprocessing::FeaturePipeline,
    telemetry::{LearningTelemetry, RunTelemetry},
};

pub use crate::telemetry::TrainingStage;

/// Run manifest file inside the reports directory.
pub const MANIFEST_FILE: &str = "index.jsonl";
/// Copy of the most recent report inside the reports directory.
pub const LATEST_REPORT: &str = "latest.json";

/// Everything a finished run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOutcome {
    /// Report file stem, `run_<UTC>_<model>_<version>`.
    pub run_id: String,
    /// Cross-validation summary.
    pub metrics: RunMetrics,
    /// Fitted estimator artifact.
    pub model_path: PathBuf,
    /// Fitted pipeline artifact.
    pub preprocessor_path: PathBuf,
    /// Timestamped report.
    pub report_path: PathBuf,
    /// `latest.json` copy of the report.
    pub latest_path: PathBuf,
}

/// One line of the run manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifestEntry {
    /// Report file stem.
    pub run_id: String,
    /// Configured model name.
    pub model_name: String,
    /// Estimator type.
    pub model_type: String,
    /// Artifact version tag.
    pub version_tag: String,
    /// Completion time.
    pub finished_at: DateTime<Utc>,
    /// Mean MAE over folds.
    pub mean_mae: f64,
    /// Mean RMSE over folds.
    pub mean_rmse: f64,
    /// Mean R² over folds.
    pub mean_r2: f64,
    /// Report path, relative to the params root when possible.
    pub metrics_path: String,
}

/// Splits `table` into the feature columns and a numeric target. Every absent
/// column is listed in one error; missing or non-numeric targets are rejected.
pub fn split_xy(
    table: &Table,
    feature_cols: &[String],
    target_col: &str,
) -> Result<(Table, Vec<f64>), LearningError> {
    let missing: Vec<String> = feature_cols
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(target_col))
        .filter(|name| !table.contains(name))
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(LearningError::MissingColumns(missing));
    }

    let target = table.require(target_col)?.to_numbers();
    let invalid = target
        .iter()
        .filter(|value| !value.is_some_and(f64::is_finite))
        .count();
    if invalid > 0 {
        return Err(LearningError::InvalidTarget {
            column: target_col.to_string(),
            invalid,
        });
    }
    Ok((table.select(feature_cols)?, target.into_iter().flatten().collect()))
}

/// Runs K-fold cross-validation for `model_name`, refits on all rows and
/// persists the artifact pair, the report, `latest.json` and a manifest line.
pub fn train_and_evaluate(
    params: &TrainParams,
    model_name: &str,
    version_tag: &str,
    telemetry: Option<&LearningTelemetry>,
) -> Result<TrainingOutcome, LearningError> {
    let spec = params
        .models
        .get(model_name)
        .ok_or_else(|| LearningError::UnknownModel {
            name: model_name.to_string(),
            available: params.model_names(),
        })?;
    let random_state = params.train.random_state;
    let template = build_model(&spec.model_type, &spec.params, random_state)?;
    params.data.outliers.validate()?;
    let run = RunTelemetry::new(telemetry, model_name, version_tag);

    let started_at = Utc::now();
    let clock = Instant::now();
    let csv_path = params.resolve(&params.data.train_csv);
    if !csv_path.exists() {
        return Err(LearningError::TrainingDataNotFound(csv_path));
    }
    let mut table = Table::read_csv(&csv_path)?;
    let outliers = &params.data.outliers;
    if outliers.applies() {
        table = iqr_clip(&table, &params.data.numeric_features, outliers.k);
    }

    let features: Vec<String> = params
        .data
        .numeric_features
        .iter()
        .chain(&params.data.categorical_features)
        .cloned()
        .collect();
    let (x, y) = split_xy(&table, &features, &params.data.target_col)?;
    let folds = KFold::new(params.train.cv_folds, random_state).split(y.len())?;

    run.milestone(
        TrainingStage::Loaded,
        "training.started",
        json!({
            "model_type": spec.model_type,
            "rows": y.len(),
            "cv_folds": folds.len(),
            "outliers_clipped": outliers.applies(),
        }),
    );

    let pipeline = FeaturePipeline::new(
        params.data.numeric_features.clone(),
        params.data.categorical_features.clone(),
    );
    let mut fold_metrics = Vec::with_capacity(folds.len());
    for (idx, split) in folds.iter().enumerate() {
        let fold = idx + 1;
        run.milestone(
            TrainingStage::Split,
            "training.fold.started",
            json!({ "fold": fold, "train_rows": split.train.len(), "test_rows": split.test.len() }),
        );

        let train_x = x.take_rows(&split.train);
        let fitted = pipeline.fit(&train_x)?;
        let mut model = template.clone();
        model.fit(&fitted.transform(&train_x)?, &gather(&y, &split.train))?;
        run.progress(TrainingStage::Fit, "training.fold.fitted", json!({ "fold": fold }));

        let predictions = model.predict(&fitted.transform(&x.take_rows(&split.test))?)?;
        let scores = FoldMetrics::score(fold, &gather(&y, &split.test), &predictions);
        run.milestone(
            TrainingStage::Score,
            "training.fold.completed",
            serde_json::to_value(scores)?,
        );
        fold_metrics.push(scores);
    }

    let mean_mae = mean(fold_metrics.iter().map(|m| m.mae));
    let mean_rmse = mean(fold_metrics.iter().map(|m| m.rmse));
    let mean_r2 = mean(fold_metrics.iter().map(|m| m.r2));
    run.milestone(
        TrainingStage::Aggregated,
        "training.aggregated",
        json!({ "mean_mae": mean_mae, "mean_rmse": mean_rmse, "mean_r2": mean_r2 }),
    );

    let fitted = pipeline.fit(&x)?;
    let mut model = template;
    model.fit(&fitted.transform(&x)?, &y)?;
    run.progress(
        TrainingStage::FullFit,
        "training.full_fit",
        json!({ "rows": y.len(), "n_features": fitted.n_features() }),
    );

    let artifacts_dir = params.resolve(&params.artifacts.dir);
    let model_path =
        artifacts_dir.join(format!("{}{version_tag}.json", params.artifacts.model_prefix));
    let preprocessor_path =
        artifacts_dir.join(format!("{}{version_tag}.json", params.artifacts.preprocessor_prefix));
    let trained_at = Utc::now();
    save_json_atomic(
        &model_path,
        &ModelArtifact {
            version_tag: version_tag.to_string(),
            model_name: model_name.to_string(),
            trained_at,
            feature_names: fitted.feature_names(),
            estimator: model,
        },
    )?;
    save_json_atomic(
        &preprocessor_path,
        &PreprocessorArtifact {
            version_tag: version_tag.to_string(),
            target_col: params.data.target_col.clone(),
            pipeline: fitted,
        },
    )?;

    let metrics = RunMetrics {
        model_name: model_name.to_string(),
        model_type: spec.model_type.clone(),
        started_at_utc: started_at.to_rfc3339(),
        duration_s: clock.elapsed().as_secs_f64(),
        cv_folds: folds.len(),
        fold_metrics,
        mean_mae,
        mean_rmse,
        mean_r2,
    };

    let finished_at = Utc::now();
    let run_id = format!(
        "run_{}_{model_name}_{version_tag}",
        finished_at.format("%Y%m%dT%H%M%SZ")
    );
    let reports_dir = params.resolve(&params.reports.dir);
    let report_path = reports_dir.join(format!("{run_id}.json"));
    let latest_path = reports_dir.join(LATEST_REPORT);
    let payload = json!({
        "run": metrics,
        "params": {
            "model": spec.model_type,
            "model_params": spec.params,
            "data": {
                "train_csv": params.data.train_csv,
                "target_col": params.data.target_col,
                "numeric_features": params.data.numeric_features,
                "categorical_features": params.data.categorical_features,
                "outliers": params.data.outliers,
            },
            "train": params.train,
        },
        "artifacts": {
            "model_path": display_path(&params.root, &model_path),
            "preprocessor_path": display_path(&params.root, &preprocessor_path),
            "version_tag": version_tag,
        },
        "env": {
            "model_version_env": std::env::var("MODEL_VERSION").ok(),
        },
    });
    save_json_atomic(&report_path, &payload)?;
    save_json_atomic(&latest_path, &payload)?;

    JsonLinesWriter::open(reports_dir.join(MANIFEST_FILE))?.append(&RunManifestEntry {
        run_id: run_id.clone(),
        model_name: model_name.to_string(),
        model_type: spec.model_type.clone(),
        version_tag: version_tag.to_string(),
        finished_at,
        mean_mae,
        mean_rmse,
        mean_r2,
        metrics_path: display_path(&params.root, &report_path),
    })?;

    run.milestone(
        TrainingStage::Persisted,
        "training.persisted",
        json!({
            "run_id": run_id,
            "model_path": model_path,
            "preprocessor_path": preprocessor_path,
            "report_path": report_path,
            "duration_s": metrics.duration_s,
        }),
    );

    Ok(TrainingOutcome {
        run_id,
        metrics,
        model_path,
        preprocessor_path,
        report_path,
        latest_path,
    })
}

/// Manifest file for a params file's reports directory.
#[must_use]
pub fn manifest_path(params: &TrainParams) -> PathBuf {
    params.resolve(&params.reports.dir).join(MANIFEST_FILE)
}

/// Reads every manifest entry, oldest first. A missing manifest is empty.
pub fn read_manifest(path: impl AsRef<Path>) -> Result<Vec<RunManifestEntry>, LearningError> {
    Ok(read_json_lines(path)?)
}

fn gather(values: &[f64], indices: &[usize]) -> Vec<f64> {
    indices.iter().map(|&i| values[i]).collect()
}

fn display_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Arc};

    use serde_json::Value;
    use shared_event_bus::MemoryEventBus;
    use spi_data::{synthesize, Column};
    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::artifacts::load_json;

    fn params_in(dir: &Path, models: Value) -> TrainParams {
        let params: TrainParams = serde_json::from_value(json!({
            "data": {
                "train_csv": "data/processed/train.csv",
                "target_col": "price_per_sqm",
                "numeric_features": ["area", "rooms", "year_built", "monthly_fee", "transaction_year"],
                "categorical_features": ["district"],
            },
            "train": { "random_state": 42, "cv_folds": 3 },
            "models": models,
        }))
        .unwrap();
        params.with_root(dir)
    }

    fn with_training_csv(rows: usize) -> TempDir {
        let dir = tempdir().unwrap();
        let csv = dir.path().join("data/processed/train.csv");
        fs::create_dir_all(csv.parent().unwrap()).unwrap();
        synthesize(rows, 7).unwrap().write_csv(&csv).unwrap();
        dir
    }

    fn spy() -> (Arc<MemoryEventBus>, LearningTelemetry) {
        let bus = Arc::new(MemoryEventBus::new(256));
        let telemetry = LearningTelemetry::builder("spi-learning")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        (bus, telemetry)
    }

    #[test]
    fn unknown_model_fails_before_any_fold() {
        let dir = with_training_csv(60);
        let params = params_in(dir.path(), json!({ "baseline": { "type": "linear" } }));
        let (bus, telemetry) = spy();

        let err = train_and_evaluate(&params, "does_not_exist", "v1", Some(&telemetry)).unwrap_err();
        match err {
            LearningError::UnknownModel { name, available } => {
                assert_eq!(name, "does_not_exist");
                assert_eq!(available, vec!["baseline"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(bus.count("training.fold.started"), 0);
        assert!(bus.snapshot().is_empty());
        assert!(!dir.path().join("models").exists());
        assert!(!dir.path().join("reports").exists());
    }

    #[test]
    fn invalid_spec_is_rejected_before_loading_data() {
        let dir = tempdir().unwrap();
        let params = params_in(
            dir.path(),
            json!({ "rf": { "type": "random_forest", "n_trees": 10 } }),
        );
        let err = train_and_evaluate(&params, "rf", "v1", None).unwrap_err();
        assert!(matches!(err, LearningError::InvalidParams { .. }));

        let params = params_in(dir.path(), json!({ "baseline": { "type": "linear" } }));
        let err = train_and_evaluate(&params, "baseline", "v1", None).unwrap_err();
        assert!(matches!(err, LearningError::TrainingDataNotFound(_)));

        let mut params = params;
        params.data.outliers.k = f64::NAN;
        let err = train_and_evaluate(&params, "baseline", "v1", None).unwrap_err();
        assert!(matches!(err, LearningError::InvalidOutlierFence(_)));
    }

    #[test]
    fn split_xy_lists_every_missing_column() {
        let table = Table::from_columns([
            ("area", Column::Number(vec![Some(50.0)])),
            ("price_per_sqm", Column::Text(vec![Some("n/a".into())])),
        ])
        .unwrap();
        let features = vec!["area".to_string(), "rooms".to_string(), "district".to_string()];
        let err = split_xy(&table, &features, "target").unwrap_err();
        assert!(matches!(
            err,
            LearningError::MissingColumns(ref cols) if cols == &["rooms", "district", "target"]
        ));

        let err = split_xy(&table, &features[..1], "price_per_sqm").unwrap_err();
        assert!(matches!(err, LearningError::InvalidTarget { invalid: 1, .. }));
    }

    #[test]
    fn linear_run_persists_artifacts_reports_and_manifest() {
        let dir = with_training_csv(240);
        let params = params_in(dir.path(), json!({ "baseline": { "type": "linear" } }));
        let (bus, telemetry) = spy();

        let outcome = train_and_evaluate(&params, "baseline", "v7", Some(&telemetry)).unwrap();

        assert_eq!(outcome.metrics.cv_folds, 3);
        assert_eq!(outcome.metrics.fold_metrics.len(), 3);
        assert_eq!(
            outcome.metrics.fold_metrics.iter().map(|m| m.fold).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(outcome.metrics.mean_mae.is_finite() && outcome.metrics.mean_mae > 0.0);
        assert!(outcome.metrics.mean_rmse >= outcome.metrics.mean_mae);

        assert_eq!(bus.count("training.started"), 1);
        assert_eq!(bus.count("training.fold.started"), 3);
        assert_eq!(bus.count("training.fold.completed"), 3);
        assert_eq!(bus.count("training.aggregated"), 1);
        assert_eq!(bus.count("training.persisted"), 1);
        assert!(bus
            .snapshot()
            .iter()
            .all(|e| e.payload["model_name"] == "baseline" && e.payload["version_tag"] == "v7"));
        let scored = bus
            .snapshot()
            .into_iter()
            .find(|e| e.event_type == "training.fold.completed")
            .unwrap();
        assert_eq!(scored.payload["stage"], "score");

        assert_eq!(outcome.model_path, dir.path().join("models/model_v7.json"));
        assert_eq!(outcome.preprocessor_path, dir.path().join("models/preprocessor_v7.json"));
        let model = ModelArtifact::load(&outcome.model_path).unwrap();
        let preprocessor = PreprocessorArtifact::load(&outcome.preprocessor_path).unwrap();
        assert_eq!(model.version_tag, "v7");
        assert_eq!(model.feature_names.len(), preprocessor.pipeline.n_features());

        let latest: Value = load_json(&outcome.latest_path).unwrap();
        let report: Value = load_json(&outcome.report_path).unwrap();
        assert_eq!(latest, report);
        assert_eq!(latest["run"]["model_name"], "baseline");
        assert_eq!(latest["params"]["model"], "linear");
        assert_eq!(latest["artifacts"]["model_path"], "models/model_v7.json");
        assert_eq!(latest["params"]["train"]["cv_folds"], 3);
        assert!(outcome.run_id.starts_with("run_") && outcome.run_id.ends_with("_baseline_v7"));

        let manifest = read_manifest(manifest_path(&params)).unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].run_id, outcome.run_id);
        assert!((manifest[0].mean_mae - outcome.metrics.mean_mae).abs() < 1e-6);
    }

    #[test]
    fn forest_run_is_reproducible_for_a_seed() {
        let dir = with_training_csv(150);
        let params = params_in(
            dir.path(),
            json!({ "rf": { "type": "random_forest", "n_estimators": 8, "max_depth": 6 } }),
        );
        let first = train_and_evaluate(&params, "rf", "v1", None).unwrap();
        let second = train_and_evaluate(&params, "rf", "v2", None).unwrap();
        assert_eq!(first.metrics.fold_metrics, second.metrics.fold_metrics);

        let manifest = read_manifest(manifest_path(&params)).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest[1].version_tag, "v2");
    }

    #[test]
    fn missing_manifest_reads_as_empty() {
        let dir = tempdir().unwrap();
        assert!(read_manifest(dir.path().join(MANIFEST_FILE)).unwrap().is_empty());
    }
}
