//! Course Port Server
//!
//! HTTP service for chunked course archive import and tarball export.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use courseport_server::config::Config;
use courseport_server::routes;
use courseport_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courseport_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Invalid environment configuration, using defaults");
        Config::default()
    });

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_root = %config.storage.data_root.display(),
        "Starting Course Port Server"
    );

    tokio::fs::create_dir_all(&config.storage.data_root)
        .await
        .with_context(|| format!("Failed to create data root {}", config.storage.data_root.display()))?;

    let app_state = AppState::from_config(config.clone())
        .await
        .context("Failed to initialize application state")?;

    // Abandoned uploads leave staging directories behind
    let sweeper = app_state.staging_sweeper().start_cleanup_task();

    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid SERVER_HOST {}", config.server.host))?;
    let addr = SocketAddr::from((host, config.server.port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, routes::build_router(app_state))
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .context("Server error")?;

    sweeper.abort();
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
///
/// A handler that cannot be installed never fires; the other one still can.
async fn wait_for_shutdown() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal_name = tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    };
    tracing::info!(signal = signal_name, "Draining in-flight requests");
}
