use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use spi_learning::LearningError;
use thiserror::Error;

use crate::schemas::FieldError;

/// Errors raised at startup or while serving a request.
#[derive(Debug, Error)]
pub enum ApiError {
    /// An artifact file does not exist.
    #[error("{kind} artifact not found at '{}'. Run training to create it", path.display())]
    ArtifactMissing {
        /// `model` or `preprocessor`.
        kind: &'static str,
        /// Configured path.
        path: PathBuf,
    },
    /// An artifact exists but could not be read.
    #[error("failed to load {kind} artifact from '{}': {source}", path.display())]
    ArtifactLoad {
        /// `model` or `preprocessor`.
        kind: &'static str,
        /// Configured path.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: LearningError,
    },
    /// An environment variable holds an unusable value.
    #[error("invalid value for {var}: '{value}'")]
    Config {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
    /// The request body failed validation.
    #[error("request validation failed with {} error(s)", .0.len())]
    Validation(Vec<FieldError>),
    /// The model could not produce a usable prediction.
    #[error("inference failed: {0}")]
    Inference(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(detail) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "detail": detail }))).into_response()
            }
            other => {
                tracing::error!(error = %other, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": other.to_string() })),
                )
                    .into_response()
            }
        }
    }
}
