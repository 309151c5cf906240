//! Tool hub server.
//!
//! Run with: cargo run -p toolhub-server
//!
//! Configuration comes from `TOOLHUB_*` / `OPENAI_*` environment variables;
//! logging from `RUST_LOG` (default `info`).

mod app;
mod config;

use anyhow::Context as _;
use toolhub_core::Settings;
use toolhub_transport::create_router;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ServerConfig::from_settings(&Settings::from_env()).context("invalid configuration")?;
    let state = app::build_state(&config).await?;

    let manager = state.manager.clone();
    let reaper = manager.spawn_reaper();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("binding {}", config.addr))?;
    tracing::info!("Server listening on http://{}", config.addr);

    // Closing every session ends open WebSocket and SSE streams, which lets
    // the graceful shutdown complete.
    let closing = manager.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            closing.shutdown().await;
        })
        .await
        .context("server error")?;

    reaper.abort();
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("Shutdown requested");
}
