use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::types::ViewportSize;

/// Bounds for the stream frame rate. Values outside the range are clamped,
/// never rejected.
pub const MIN_STREAM_FPS: u32 = 1;
pub const MAX_STREAM_FPS: u32 = 60;

/// Bounds for the stream JPEG quality.
pub const MIN_STREAM_QUALITY: u32 = 10;
pub const MAX_STREAM_QUALITY: u32 = 100;

/// Clamp a requested frame rate into the supported range.
pub fn clamp_fps(fps: u32) -> u32 {
    fps.clamp(MIN_STREAM_FPS, MAX_STREAM_FPS)
}

/// Clamp a requested JPEG quality into the supported range.
pub fn clamp_quality(quality: u32) -> u32 {
    quality.clamp(MIN_STREAM_QUALITY, MAX_STREAM_QUALITY)
}

/// Engine launch configuration.
///
/// The engine is a Chromium-family binary driven over CDP. Alternative
/// browsers (Chrome, Chromium, Brave) are selected via `browser_path`;
/// if unset, the `headless_chrome` auto-detection is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// true = headless (no display server needed), false = headful.
    pub headless: bool,
    /// Path to the browser binary, e.g. `/usr/bin/chromium`.
    pub browser_path: Option<PathBuf>,
    /// Default viewport for new contexts that do not request their own.
    pub viewport: ViewportSize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            headless: true,
            browser_path: None,
            viewport: ViewportSize::default(),
        }
    }
}

/// Initial stream settings. Both values are clamped into their supported
/// ranges whenever a caller supplies them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreamConfig {
    pub default_fps: u32,
    pub default_quality: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            default_fps: 30,
            default_quality: 80,
        }
    }
}

/// Idle-session reaper policy.
///
/// Sessions not touched by any command for longer than `max_idle_time` are
/// closed by a background sweep, cascading page-then-context closure. A
/// zero `max_idle_time` disables the reaper entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLifecycleConfig {
    #[serde(with = "humantime_serde")]
    pub max_idle_time: Duration,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for SessionLifecycleConfig {
    fn default() -> Self {
        Self {
            max_idle_time: Duration::from_secs(30 * 60), // 30 minutes
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Top-level service configuration, assembled from environment variables in
/// the binary or constructed programmatically in embedding code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Address the HTTP API binds to.
    pub bind_addr: String,
    pub http_port: u16,
    /// Prometheus scrape endpoint runs on its own port.
    pub metrics_port: u16,
    pub enable_metrics: bool,
    pub engine: EngineConfig,
    pub stream: StreamConfig,
    pub session_lifecycle: SessionLifecycleConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            http_port: 8083,
            metrics_port: 9090,
            enable_metrics: true,
            engine: EngineConfig::default(),
            stream: StreamConfig::default(),
            session_lifecycle: SessionLifecycleConfig::default(),
        }
    }
}
