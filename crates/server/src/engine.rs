//! Ownership of the browser-engine process.
//!
//! One `EngineHandle` owns at most one launched browser. Start is idempotent
//! behind a double-checked guard (fast-path read, launch gate, re-check) so
//! two concurrent starts can never double-launch. A failed launch leaves no
//! partial state behind.

use anyhow::Result;
use headless_chrome::{Browser, LaunchOptions};
use periscope_common::EngineConfig;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Flags passed to the engine binary.
///
/// Sandboxing and site isolation are switched off on purpose: this service
/// drives arbitrary pages over CDP and cross-origin scripting has to work,
/// at the cost of process-level isolation. Callers are trusted at the
/// network boundary, so the trade is automation compatibility over defense
/// in depth.
const ENGINE_ARGS: &[&str] = &[
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--disable-setuid-sandbox",
    "--no-sandbox",
    "--disable-web-security",
    "--disable-features=IsolateOrigins,site-per-process",
    "--disable-site-isolation-trials",
];

/// Keep the CDP WebSocket open even when the service is idle for long
/// stretches. The library default of 30 seconds causes "connection is
/// closed" errors on the first request after a quiet period.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Browser not started")]
    NotStarted,
    #[error("browser launch failed: {0}")]
    Launch(String),
}

/// Handle to the (at most one) running engine process.
pub struct EngineHandle {
    config: EngineConfig,
    browser: RwLock<Option<Arc<Browser>>>,
    /// Serializes start/stop so concurrent starts re-check after waiting.
    launch_gate: Mutex<()>,
}

impl EngineHandle {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            browser: RwLock::new(None),
            launch_gate: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Launch the engine. Returns `false` if it was already running.
    pub async fn start(&self) -> Result<bool, EngineError> {
        if self.browser.read().await.is_some() {
            debug!("Engine already started - ignoring start request");
            return Ok(false);
        }

        let _gate = self.launch_gate.lock().await;

        // Another start may have finished while we waited on the gate.
        if self.browser.read().await.is_some() {
            debug!("Engine started concurrently - ignoring start request");
            return Ok(false);
        }

        info!(
            "Launching browser engine (headless: {}, viewport: {})",
            self.config.headless, self.config.viewport
        );

        let config = self.config.clone();
        let browser = tokio::task::spawn_blocking(move || launch_engine(&config))
            .await
            .map_err(|e| EngineError::Launch(format!("launch task failed: {}", e)))?
            .map_err(|e| EngineError::Launch(e.to_string()))?;

        *self.browser.write().await = Some(Arc::new(browser));
        info!("Browser engine started");
        Ok(true)
    }

    /// Release the engine process. Returns `false` if it was not running.
    ///
    /// Callers are responsible for closing contexts first (the service
    /// cascades capture-loop stop and registry teardown before calling
    /// this).
    pub async fn stop(&self) -> bool {
        let _gate = self.launch_gate.lock().await;

        let Some(browser) = self.browser.write().await.take() else {
            return false;
        };

        // Teardown kills and waits on the child process; keep that off the
        // async runtime.
        let _ = tokio::task::spawn_blocking(move || drop(browser)).await;
        info!("Browser engine stopped");
        true
    }

    pub async fn is_started(&self) -> bool {
        self.browser.read().await.is_some()
    }

    /// The running engine, or `EngineError::NotStarted`.
    pub async fn browser(&self) -> Result<Arc<Browser>, EngineError> {
        self.browser
            .read()
            .await
            .clone()
            .ok_or(EngineError::NotStarted)
    }
}

/// Launch the engine binary. Runs on the blocking pool.
fn launch_engine(config: &EngineConfig) -> Result<Browser> {
    let args: Vec<&OsStr> = ENGINE_ARGS.iter().map(OsStr::new).collect();

    let mut launch_builder = LaunchOptions::default_builder();
    launch_builder
        .headless(config.headless)
        .window_size(Some((config.viewport.width, config.viewport.height)))
        .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
        .args(args);

    if let Some(ref browser_path) = config.browser_path {
        info!("Using browser binary: {}", browser_path.display());
        verify_engine_binary(browser_path);
        launch_builder.path(Some(browser_path.clone()));
    }

    let launch_options = launch_builder
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build launch options: {}", e))?;

    Browser::new(launch_options).map_err(|e| {
        tracing::error!(
            "Browser failed to launch: {}. \
             Common causes: (1) binary not found or not executable, \
             (2) running in a container without the shared libraries the \
             browser needs, (3) no usable /dev/shm. \
             Check the binary path and container capabilities.",
            e
        );
        e
    })
}

/// Pre-flight check: log useful diagnostics when the configured binary looks
/// wrong. Never fails the launch by itself.
fn verify_engine_binary(binary_path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;

    if !binary_path.exists() {
        warn!(
            "Browser binary not found at '{}'. Launch will fall back to auto-detection.",
            binary_path.display()
        );
        return;
    }

    match std::fs::metadata(binary_path) {
        Ok(metadata) => {
            let mode = metadata.permissions().mode();
            if mode & 0o111 == 0 {
                warn!(
                    "Browser binary '{}' exists but is NOT executable (mode: {:o})",
                    binary_path.display(),
                    mode
                );
            }
        }
        Err(e) => {
            warn!(
                "Cannot read metadata for browser binary '{}': {}",
                binary_path.display(),
                e
            );
        }
    }

    let uid = unsafe { libc::getuid() };
    if uid != 0 {
        debug!(
            "Running as non-root user (uid: {}). If the browser fails to start, \
             verify container security context and capabilities.",
            uid
        );
    }
}
