use std::{path::Path, sync::Arc};

use shared_logging::JsonLinesWriter;
use spi_learning::{Estimator, FittedPipeline, ModelArtifact, PreprocessorArtifact};

use crate::{config::ServiceConfig, error::ApiError};

/// Fitted pipeline and estimator, frozen for the service lifetime.
#[derive(Debug)]
pub struct LoadedArtifacts {
    /// Feature pipeline.
    pub pipeline: FittedPipeline,
    /// Estimator.
    pub estimator: Estimator,
    /// Version tag echoed in responses.
    pub model_version: String,
}

/// State shared by every handler. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct AppContext {
    /// Service settings.
    pub config: Arc<ServiceConfig>,
    /// Loaded artifact pair.
    pub artifacts: Arc<LoadedArtifacts>,
    /// Prediction log; `None` when it could not be opened.
    pub prediction_log: Option<Arc<JsonLinesWriter>>,
}

impl AppContext {
    /// Loads both artifacts named by `config`. A missing or unreadable file is
    /// a startup error naming the path.
    pub fn load(config: ServiceConfig) -> Result<Self, ApiError> {
        let model = load_artifact("model", &config.model_path, |path| ModelArtifact::load(path))?;
        let preprocessor = load_artifact("preprocessor", &config.preprocessor_path, |path| {
            PreprocessorArtifact::load(path)
        })?;
        tracing::info!(
            model = %config.model_path.display(),
            preprocessor = %config.preprocessor_path.display(),
            trained_version = %model.version_tag,
            model_type = %model.estimator.kind(),
            "artifacts loaded"
        );
        let artifacts = LoadedArtifacts {
            pipeline: preprocessor.pipeline,
            estimator: model.estimator,
            model_version: config.model_version.clone(),
        };
        Ok(Self::new(config, artifacts))
    }

    /// Builds a context around already-loaded artifacts and opens the
    /// prediction log.
    #[must_use]
    pub fn new(config: ServiceConfig, artifacts: LoadedArtifacts) -> Self {
        let prediction_log = match JsonLinesWriter::open(&config.prediction_log_path) {
            Ok(writer) => Some(Arc::new(writer)),
            Err(err) => {
                tracing::warn!(
                    path = %config.prediction_log_path.display(),
                    error = %err,
                    "prediction log unavailable; predictions will not be recorded"
                );
                None
            }
        };
        Self {
            config: Arc::new(config),
            artifacts: Arc::new(artifacts),
            prediction_log,
        }
    }
}

fn load_artifact<T>(
    kind: &'static str,
    path: &Path,
    load: impl FnOnce(&Path) -> Result<T, spi_learning::LearningError>,
) -> Result<T, ApiError> {
    if !path.exists() {
        return Err(ApiError::ArtifactMissing {
            kind,
            path: path.to_path_buf(),
        });
    }
    load(path).map_err(|source| ApiError::ArtifactLoad {
        kind,
        path: path.to_path_buf(),
        source,
    })
}
