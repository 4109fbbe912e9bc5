#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! HTTP prediction service: loads a fitted pipeline and estimator once at
//! startup and serves `/health`, `/model-info` and `/predict`.

/// Environment-driven service settings.
#[path = "../config.rs"]
pub mod config;

/// Startup and request errors.
#[path = "../error.rs"]
pub mod error;

/// Request/response bodies and validation.
#[path = "../schemas.rs"]
pub mod schemas;

/// Loaded artifacts shared by handlers.
#[path = "../context.rs"]
pub mod context;

/// Route handlers.
#[path = "../handlers.rs"]
pub mod handlers;

/// Router assembly.
#[path = "../router.rs"]
pub mod router;

pub use config::{CorsOrigins, ServiceConfig, TargetMode};
pub use context::{AppContext, LoadedArtifacts};
pub use error::ApiError;
pub use router::build_router;
pub use schemas::{FieldError, ModelInfo, ModelMetrics, PredictRequest, PredictResponse};
