mod capture;
mod cdp;
mod engine;
mod http;
mod metrics;
mod registry;
mod service;
mod stream;

pub use capture::{Frame, FrameSlot, FrameSource, StreamController, StreamStatus};
pub use engine::{EngineError, EngineHandle};
pub use http::api_router;
pub use metrics::Metrics;
pub use registry::{PageRegistry, RegistryError};
pub use service::{ApiError, BrowserService, HealthSnapshot};

use anyhow::Result;
use periscope_common::ServiceConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

/// Run the service until SIGTERM/Ctrl-C.
///
/// This is the main entry point for hosting periscope. The engine itself is
/// launched lazily on the first session (or explicitly via
/// `POST /api/browser/start`); shutdown cascades capture loop → contexts →
/// engine before the process exits.
pub async fn run_server(config: ServiceConfig) -> Result<()> {
    info!(
        "Starting periscope server on {}:{} (headless: {}, viewport: {})",
        config.bind_addr, config.http_port, config.engine.headless, config.engine.viewport
    );

    let service = Arc::new(BrowserService::new(config.clone())?);
    service.spawn_session_reaper();

    // Prometheus scrapes run on their own port so the API surface stays
    // clean.
    if config.enable_metrics {
        let metrics = service.metrics().clone();
        let metrics_port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = metrics.start_server(metrics_port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    }

    let app = api_router(service.clone());

    let addr: SocketAddr = format!("{}:{}", config.bind_addr, config.http_port)
        .parse()
        .expect("Invalid address");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(service.clone()))
        .await?;

    service.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal(service: Arc<BrowserService>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C signal");
        },
        _ = terminate => {
            warn!("Received SIGTERM signal");
        },
    }

    info!("Cancelling in-flight operations...");
    service.request_shutdown();
}
