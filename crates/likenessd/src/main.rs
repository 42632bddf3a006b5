use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod routes;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = config::Config::from_env();
    tracing::info!(
        bind = %config.bind,
        model = %config.model_path.display(),
        users_dir = %config.users_dir.display(),
        "likenessd starting"
    );

    let engine = engine::start_engine(&config).context("failed to start recognition engine")?;
    let app = routes::router(engine, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(addr = %listener.local_addr()?, "likenessd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("likenessd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
