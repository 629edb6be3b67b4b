use anyhow::Result;
use periscope_common::{
    EngineConfig, ServiceConfig, SessionLifecycleConfig, StreamConfig, ViewportSize,
};
use periscope_server::run_server;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level_from_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config_from_env()?;
    run_server(config).await
}

fn log_level_from_env() -> Level {
    match std::env::var("PERISCOPE_LOG")
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn load_config_from_env() -> Result<ServiceConfig> {
    use std::env;
    use std::path::PathBuf;
    use std::time::Duration;

    let bind_addr = env::var("PERISCOPE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string());
    let http_port = env::var("PERISCOPE_HTTP_PORT")
        .unwrap_or_else(|_| "8083".to_string())
        .parse::<u16>()?;
    let metrics_port = env::var("PERISCOPE_METRICS_PORT")
        .unwrap_or_else(|_| "9090".to_string())
        .parse::<u16>()?;
    let enable_metrics = env::var("PERISCOPE_ENABLE_METRICS")
        .map(|v| v != "0" && v.to_lowercase() != "false")
        .unwrap_or(true);

    let headless = env::var("PERISCOPE_HEADLESS")
        .map(|v| v != "0" && v.to_lowercase() != "false")
        .unwrap_or(true);
    let browser_path = env::var("PERISCOPE_BROWSER_PATH").ok().map(PathBuf::from);

    let viewport = ViewportSize {
        width: env::var("PERISCOPE_VIEWPORT_WIDTH")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1280),
        height: env::var("PERISCOPE_VIEWPORT_HEIGHT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(720),
    };

    let stream = StreamConfig {
        default_fps: env::var("PERISCOPE_DEFAULT_FPS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30),
        default_quality: env::var("PERISCOPE_DEFAULT_QUALITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(80),
    };

    // Idle sessions are reaped after this many seconds; 0 disables reaping.
    let max_idle_secs = env::var("PERISCOPE_SESSION_MAX_IDLE_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(30 * 60);

    Ok(ServiceConfig {
        bind_addr,
        http_port,
        metrics_port,
        enable_metrics,
        engine: EngineConfig {
            headless,
            browser_path,
            viewport,
        },
        stream,
        session_lifecycle: SessionLifecycleConfig {
            max_idle_time: Duration::from_secs(max_idle_secs),
            ..Default::default()
        },
    })
}
