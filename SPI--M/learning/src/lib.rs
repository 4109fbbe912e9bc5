#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Price-per-sqm training stack: IQR outlier clamp, feature pipeline,
//! regressors, K-fold evaluation and artifact persistence.

/// Training error taxonomy.
#[path = "../error.rs"]
pub mod error;

/// Interquartile-range clamp for numeric features.
#[path = "../outliers.rs"]
pub mod outliers;

/// Median imputation and one-hot encoding.
#[path = "../preprocessing.rs"]
pub mod preprocessing;

/// Regression metrics and run summaries.
#[path = "../metrics.rs"]
pub mod metrics;

/// Shuffled K-fold splitter.
#[path = "../kfold.rs"]
pub mod kfold;

/// Estimators and the model factory.
#[path = "../models/main.rs"]
pub mod models;

/// Params file loading.
#[path = "../config.rs"]
pub mod config;

/// Fitted artifact persistence.
#[path = "../artifacts.rs"]
pub mod artifacts;

/// Telemetry helpers for logging/event emission.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Training orchestration.
#[path = "../training.rs"]
pub mod training;

pub use artifacts::{ModelArtifact, PreprocessorArtifact};
pub use config::{ArtifactsConfig, DataConfig, ModelSpec, ReportsConfig, TrainConfig, TrainParams};
pub use error::LearningError;
pub use metrics::{FoldMetrics, RunMetrics};
pub use models::{build_model, Estimator, ModelKind};
pub use outliers::OutlierConfig;
pub use preprocessing::{FeaturePipeline, FittedPipeline};
pub use telemetry::{LearningTelemetry, LearningTelemetryBuilder, RunTelemetry};
pub use training::{
    manifest_path, read_manifest, split_xy, train_and_evaluate, RunManifestEntry,
    TrainingOutcome, TrainingStage,
};
