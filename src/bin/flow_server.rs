//! Portfolio flow visualization server
//!
//! ## Usage
//!
//! ```bash
//! TP_DOMAIN=acme.tpondemand.com TP_API_TOKEN=... cargo run --bin flow_server
//!
//! curl -X POST http://localhost:3000/api/visualizations/sankey \
//!   -H "Content-Type: application/json" \
//!   -d '{"title": "Portfolio Flow"}'
//!
//! curl http://localhost:3000/api/visualizations
//! curl http://localhost:3000/api/visualizations/test/connection
//! ```
//!
//! Viewers connect to `ws://localhost:3000/ws` and send
//! `{"type": "subscribe", "visualizationId": "<id>"}`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use portfolio_flow::api::{router, AppState};
use portfolio_flow::broadcast::Broadcaster;
use portfolio_flow::store::VisualizationStore;
use portfolio_flow::upstream::TargetProcessClient;
use portfolio_flow::{AppConfig, VisualizationService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "portfolio_flow=debug,flow_server=info,tower_http=debug".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().context("Invalid configuration")?;
    info!("Starting portfolio flow server");
    info!("TargetProcess API: {}", config.client.base_url);

    let client = TargetProcessClient::new(config.client.clone())
        .context("Failed to create TargetProcess client")?;
    let store = VisualizationStore::new(config.cache_ttl);
    let broadcaster = Arc::new(Broadcaster::new(config.heartbeat_interval));

    let heartbeat = if config.real_time_enabled {
        Some(broadcaster.spawn_heartbeat())
    } else {
        warn!("Real-time updates disabled; heartbeat sweep not started");
        None
    };

    let service = Arc::new(VisualizationService::new(
        Arc::new(client),
        store,
        broadcaster.clone(),
    ));
    let app = router(AppState::new(service), &config.allowed_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return Err(e).context(format!("Failed to bind to {addr}"));
        }
    };

    info!("Server listening on http://{}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);
    info!("Allowed origins: {}", config.allowed_origins.join(", "));

    let shutdown_broadcaster = broadcaster.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            info!("Shutdown signal received, closing viewer connections");
            // Open sockets keep the server alive until they are closed
            shutdown_broadcaster.shutdown().await;
        })
        .await
        .context("Server error")?;

    if let Some(handle) = heartbeat {
        handle.abort();
    }
    info!("Server stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
