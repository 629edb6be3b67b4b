use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    pub active_sessions: IntGauge,
    pub stream_viewers: IntGauge,
    pub frames_captured: IntCounter,
    pub requests_total: IntCounter,
    pub requests_failed: IntCounter,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Arc::new(Registry::new());

        let active_sessions = IntGauge::new(
            "periscope_server_active_sessions",
            "Number of live browser sessions",
        )?;
        registry.register(Box::new(active_sessions.clone()))?;

        let stream_viewers = IntGauge::new(
            "periscope_server_stream_viewers",
            "Number of MJPEG stream viewers currently attached",
        )?;
        registry.register(Box::new(stream_viewers.clone()))?;

        let frames_captured = IntCounter::new(
            "periscope_server_frames_captured_total",
            "Total frames published by the capture loop",
        )?;
        registry.register(Box::new(frames_captured.clone()))?;

        let requests_total = IntCounter::new(
            "periscope_server_requests_total",
            "Total browser commands dispatched",
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let requests_failed = IntCounter::new(
            "periscope_server_requests_failed_total",
            "Browser commands that reported failure",
        )?;
        registry.register(Box::new(requests_failed.clone()))?;

        Ok(Self {
            registry,
            active_sessions,
            stream_viewers,
            frames_captured,
            requests_total,
            requests_failed,
        })
    }

    /// Start the HTTP server for Prometheus scrapes on the given port.
    pub async fn start_server(self, port: u16) -> anyhow::Result<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let app = app.with_state(self);

        let addr = format!("0.0.0.0:{}", port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        tracing::info!("Metrics server listening on {}", addr);

        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<Metrics>,
) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = metrics.registry.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (StatusCode::OK, buffer),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_without_conflict() {
        let metrics = Metrics::new().unwrap();
        metrics.frames_captured.inc();
        metrics.active_sessions.set(3);

        assert_eq!(metrics.frames_captured.get(), 1);
        assert_eq!(metrics.active_sessions.get(), 3);
        // Each instance owns its registry; creating a second one must work.
        assert!(Metrics::new().is_ok());
    }
}
