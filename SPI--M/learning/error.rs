use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the training stack.
#[derive(Debug, Error)]
pub enum LearningError {
    /// The requested model name is not configured.
    #[error("unknown model '{name}'. Available: {available:?}")]
    UnknownModel {
        /// Requested name.
        name: String,
        /// Names present in the params file.
        available: Vec<String>,
    },
    /// The model spec names an unsupported estimator type.
    #[error("unknown model type: {0}")]
    UnknownModelType(String),
    /// Hyperparameters failed to parse or validate.
    #[error("invalid parameters for {model_type}: {message}")]
    InvalidParams {
        /// Estimator type being configured.
        model_type: String,
        /// Parser or validation message.
        message: String,
    },
    /// Feature or target columns are absent from the training data.
    #[error("missing columns in training data: {0:?}")]
    MissingColumns(Vec<String>),
    /// The target column has missing or non-numeric cells.
    #[error("target column '{column}' has {invalid} missing or non-numeric values")]
    InvalidTarget {
        /// Target column.
        column: String,
        /// Offending cells.
        invalid: usize,
    },
    /// Fold count outside `2..=rows`.
    #[error("cv_folds must be between 2 and the number of rows ({rows}), got {folds}")]
    InvalidFolds {
        /// Requested folds.
        folds: usize,
        /// Rows available.
        rows: usize,
    },
    /// The outlier fence multiplier is negative or not a number.
    #[error("outliers.k must be a finite number >= 0, got {0}")]
    InvalidOutlierFence(f64),
    /// Nothing to fit on.
    #[error("cannot fit on an empty dataset")]
    EmptyDataset,
    /// Feature matrix width disagrees with the fitted model.
    #[error("feature matrix has {actual} columns, model was fitted on {expected}")]
    FeatureMismatch {
        /// Columns supplied.
        actual: usize,
        /// Columns seen during fit.
        expected: usize,
    },
    /// Feature rows and targets differ in count.
    #[error("feature matrix has {rows} rows but {targets} targets")]
    LengthMismatch {
        /// Feature rows.
        rows: usize,
        /// Target values.
        targets: usize,
    },
    /// The normal equations could not be solved.
    #[error("linear system is not positive definite")]
    SingularSystem,
    /// Prediction requested before fit.
    #[error("model has not been fitted")]
    NotFitted,
    /// The training CSV does not exist.
    #[error("training CSV not found at '{0}'. Put a processed CSV there, or update the params file")]
    TrainingDataNotFound(PathBuf),
    /// The params file could not be parsed.
    #[error("invalid params file {path}: {message}")]
    Params {
        /// Params file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
    /// Table or CSV failure.
    #[error(transparent)]
    Table(#[from] spi_data::TableError),
    /// Artifact or report serialization failure.
    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    /// JSON-lines manifest failure.
    #[error(transparent)]
    Manifest(#[from] anyhow::Error),
    /// Filesystem failure.
    #[error("io error on {path}: {source}")]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl LearningError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}
