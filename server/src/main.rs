use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{info, warn};

use server::{build_router, AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting speech server...");

    let config = ServerConfig::from_env();
    info!(
        "Server configuration loaded: voices_dir={}, personas_dir={}, device={}, engine={}",
        config.voices_dir.display(),
        config.personas_dir.display(),
        config.device,
        config.pocket_bin.display()
    );

    let state = AppState::from_config(&config);
    if state.gate.is_serialized() {
        info!("Generation is serialized across requests");
    }

    info!("Loading default voice '{}'...", config.default_voice);
    if let Err(e) = state.preload_default_voice().await {
        warn!("Could not preload default voice '{}': {e}", config.default_voice);
    }

    let app = build_router(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
