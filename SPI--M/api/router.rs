use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{self, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    config::CorsOrigins,
    context::AppContext,
    handlers::{health, model_info, predict},
};

/// Routes plus CORS and request tracing, bound to `ctx`.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = cors_layer(&ctx.config.cors_allow_origin);
    Router::new()
        .route("/health", get(health))
        .route("/model-info", get(model_info))
        .route("/predict", post(predict))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ctx)
}

fn cors_layer(origins: &CorsOrigins) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(cors::Any);
    match origins {
        CorsOrigins::Any => layer.allow_origin(cors::Any),
        CorsOrigins::List(list) => {
            let allowed: Vec<HeaderValue> = list
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            layer.allow_origin(allowed)
        }
    }
}
