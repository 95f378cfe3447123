use anyhow::Context;

use pedalstream_api::{app, config::ApiConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pedalstream_observability::init();

    let config = ApiConfig::from_env();
    let services = app::services::build_services(&config).context("failed to start event processors")?;
    let router = app::build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    tracing::info!("shutting down event processors");
    tokio::task::spawn_blocking(move || services.processors.shutdown_all()).await?;
    Ok(())
}
