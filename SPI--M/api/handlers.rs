use std::{path::Path, time::Instant};

use axum::{body::Bytes, extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::{
    config::TargetMode,
    context::{AppContext, LoadedArtifacts},
    error::ApiError,
    schemas::{ModelInfo, ModelMetrics, PredictRequest, PredictResponse},
};

/// One line of the prediction log.
#[derive(Debug, Serialize)]
pub struct PredictionRecord<'a> {
    /// Response time.
    pub ts: DateTime<Utc>,
    /// Validated request.
    pub request: &'a PredictRequest,
    /// Predicted price per m².
    pub predicted_price_per_sqm: f64,
    /// Predicted total price.
    pub predicted_total_price: f64,
    /// Loaded model version.
    pub model_version: &'a str,
    /// Handler time in milliseconds.
    pub inference_ms: f64,
}

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// `GET /model-info`
pub async fn model_info(State(ctx): State<AppContext>) -> Json<ModelInfo> {
    let path = &ctx.config.metrics_path;
    Json(ModelInfo {
        model_version: ctx.artifacts.model_version.clone(),
        target_mode: ctx.config.target_mode,
        metrics_path: Some(path.display().to_string()),
        metrics: read_metrics(path).await,
    })
}

/// `POST /predict`
pub async fn predict(
    State(ctx): State<AppContext>,
    body: Bytes,
) -> Result<Json<PredictResponse>, ApiError> {
    let started = Instant::now();
    let request = PredictRequest::from_body(&body).map_err(ApiError::Validation)?;
    let prediction = infer(&ctx.artifacts, &request)?;
    let (per_sqm, total) = match ctx.config.target_mode {
        TargetMode::TotalPrice => (prediction / request.area, prediction),
        TargetMode::PricePerSqm => (prediction, prediction * request.area),
    };
    if !(per_sqm.is_finite() && total.is_finite()) {
        return Err(ApiError::Inference(format!(
            "model produced a non-finite prediction ({prediction})"
        )));
    }
    let inference_ms = started.elapsed().as_secs_f64() * 1000.0;

    if let Some(log) = &ctx.prediction_log {
        let record = PredictionRecord {
            ts: Utc::now(),
            request: &request,
            predicted_price_per_sqm: per_sqm,
            predicted_total_price: total,
            model_version: &ctx.artifacts.model_version,
            inference_ms,
        };
        if let Err(err) = log.append(&record) {
            tracing::warn!(path = %log.path().display(), error = %err, "prediction log append failed");
        }
    }

    Ok(Json(PredictResponse {
        predicted_price_per_sqm: per_sqm,
        predicted_total_price: total,
        model_version: ctx.artifacts.model_version.clone(),
        inference_ms,
    }))
}

fn infer(artifacts: &LoadedArtifacts, request: &PredictRequest) -> Result<f64, ApiError> {
    let table = request
        .to_table()
        .map_err(|err| ApiError::Inference(err.to_string()))?;
    let features = artifacts
        .pipeline
        .transform(&table)
        .map_err(|err| ApiError::Inference(err.to_string()))?;
    artifacts
        .estimator
        .predict(&features)
        .map_err(|err| ApiError::Inference(err.to_string()))?
        .first()
        .copied()
        .ok_or_else(|| ApiError::Inference("model returned no prediction".to_string()))
}

async fn read_metrics(path: &Path) -> Option<ModelMetrics> {
    let bytes = tokio::fs::read(path).await.ok()?;
    let report: Value = serde_json::from_slice(&bytes).ok()?;
    let run = report.get("run")?;
    let field = |name: &str| run.get(name).and_then(Value::as_f64);
    Some(ModelMetrics {
        mean_mae: field("mean_mae"),
        mean_rmse: field("mean_rmse"),
        mean_r2: field("mean_r2"),
    })
}
