//! # Periscope
//!
//! Periscope exposes remote-controllable headless-browser sessions over an
//! HTTP/JSON API: navigate, screenshot, click, type, execute script — plus
//! a live MJPEG preview you can click on directly.
//!
//! Rendering, DOM interaction and JavaScript execution are delegated to a
//! Chromium-family engine driven over CDP; periscope's job is session
//! lifecycle, request routing, and the frame-streaming pipeline on top.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use periscope::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServiceConfig {
//!         http_port: 8083,
//!         ..Default::default()
//!     };
//!
//!     // Serves the JSON API, the MJPEG stream and Prometheus metrics
//!     // until SIGTERM/Ctrl-C.
//!     run_server(config).await
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Engine handle**: owns the (single) browser process; start/stop with
//!   a double-checked guard.
//! - **Registry**: maps session tokens to isolated (context, page) pairs;
//!   context closure is atomic with respect to concurrent lookups.
//! - **Dispatcher**: validates sessions and converts engine faults into
//!   structured `success: false` results.
//! - **Capture loop + stream multiplexer**: one background task captures
//!   JPEG frames into a shared latest-frame slot; any number of MJPEG
//!   viewers drain it at their own pace.

/// Re-export of shared types and configuration
pub use periscope_common as common;

/// Re-export of the HTTP service
pub use periscope_server as server;

/// Convenient re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::common::{
        EngineConfig, ServiceConfig, SessionLifecycleConfig, StreamConfig, ViewportSize,
    };

    // Command vocabulary
    pub use crate::common::{MouseButton, WaitCondition};

    // Session tracking
    pub use crate::common::{SessionInfo, SessionStats, SessionTracker};

    // Service
    pub use crate::server::{api_router, run_server, BrowserService, EngineHandle, Metrics};
}
