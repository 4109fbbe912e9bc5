use anyhow::{Context, Result};
use spi_api::{build_router, AppContext, ServiceConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spi_api=info,tower_http=info".into()),
        )
        .init();

    let config = ServiceConfig::from_env()?;
    let addr = config.bind_addr().await?;
    let ctx = AppContext::load(config).context("loading model artifacts")?;
    tracing::info!(
        model_version = %ctx.artifacts.model_version,
        target_mode = %ctx.config.target_mode,
        "spi-api v{} listening on {addr}",
        env!("CARGO_PKG_VERSION")
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, build_router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown requested");
    }
}
