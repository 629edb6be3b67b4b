//! Service context and command dispatcher.
//!
//! `BrowserService` is the one explicitly constructed object tying together
//! the engine handle, the context/page registry, session tracking and the
//! stream controller. Every dispatcher operation validates the session,
//! refreshes its last-activity timestamp, runs the blocking CDP work on the
//! blocking pool raced against cancellation and a hard timeout, and converts
//! engine-level faults into structured `success: false` results instead of
//! letting them escape.

use async_trait::async_trait;
use base64::Engine as _;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::Tab;
use periscope_common::util::{abbreviate, host_of};
use periscope_common::{
    clamp_quality, effective_timeout, map_stream_click, wait_for_condition, ActionOutcome,
    ElementTextOutcome, EvalOutcome, MouseButton, NavigateOutcome, PageContentOutcome,
    ScreenshotOutcome, ServiceConfig, SessionTracker, StreamClickOutcome, ViewportSize,
    WaitCondition,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capture::{FrameSlot, FrameSource, StreamController, StreamStatus};
use crate::cdp;
use crate::engine::{EngineError, EngineHandle};
use crate::metrics::Metrics;
use crate::registry::{PageHandle, PageRegistry, RegistryError};

/// Safety margin added on top of a caller-visible timeout before the outer
/// hard timeout fires; catches CDP calls that ignore their own deadline.
const HARD_TIMEOUT_MARGIN_SECS: u64 = 10;

/// Hard ceiling for screenshot/content/script reads.
const READ_HARD_TIMEOUT_SECS: u64 = 20;

/// Default timeout for locating an element (click, type).
const DEFAULT_ELEMENT_TIMEOUT_MS: u32 = 5_000;

/// Pause after navigation settles so page scripts get a beat to run before
/// title/content are read.
const POST_NAVIGATION_SETTLE_MS: u64 = 500;

/// Errors surfaced to HTTP callers as non-200 responses. Everything else is
/// reported inside a 200 body as `success: false`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("Invalid session ID")]
    UnknownSession,
    #[error("Browser not started")]
    EngineNotStarted,
    #[error("{0}")]
    InvalidParameter(String),
    #[error("{0}")]
    Engine(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotStarted => Self::EngineNotStarted,
            EngineError::Launch(msg) => Self::Engine(msg),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::EngineNotStarted => Self::EngineNotStarted,
            RegistryError::ContextNotFound(_) | RegistryError::PageNotFound(_) => {
                Self::UnknownSession
            }
            RegistryError::Engine(msg) => Self::Engine(msg),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub engine_started: bool,
    pub sessions: usize,
    pub streaming: bool,
    pub stream_fps: u32,
    pub stream_quality: u32,
}

pub struct BrowserService {
    config: ServiceConfig,
    engine: Arc<EngineHandle>,
    registry: Arc<PageRegistry>,
    sessions: SessionTracker,
    stream: StreamController,
    /// Page the capture loop and stream clicks follow: the most recently
    /// created session's page.
    stream_page: Arc<RwLock<Option<String>>>,
    metrics: Metrics,
    cancellation: CancellationToken,
}

impl BrowserService {
    pub fn new(config: ServiceConfig) -> anyhow::Result<Self> {
        let metrics = Metrics::new()?;
        let engine = Arc::new(EngineHandle::new(config.engine.clone()));
        let registry = Arc::new(PageRegistry::new(engine.clone()));
        let stream = StreamController::new(
            metrics.clone(),
            config.stream.default_fps,
            config.stream.default_quality,
        );

        Ok(Self {
            config,
            engine,
            registry,
            sessions: SessionTracker::new(),
            stream,
            stream_page: Arc::new(RwLock::new(None)),
            metrics,
            cancellation: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn frame_slot(&self) -> Arc<FrameSlot> {
        self.stream.slot()
    }

    // ==================== Engine lifecycle ====================

    /// Start the engine if it is not already running.
    pub async fn start_engine(&self) -> Result<bool, ApiError> {
        Ok(self.engine.start().await?)
    }

    async fn ensure_started(&self) -> Result<(), ApiError> {
        self.engine.start().await?;
        Ok(())
    }

    /// Stop the engine, cascading: capture loop → contexts/pages → engine
    /// process. The capture loop goes first so it never reads a closing
    /// page.
    pub async fn stop_engine(&self) -> bool {
        self.stream.stop().await;
        self.registry.close_all().await;
        self.sessions.clear().await;
        *self.stream_page.write().await = None;
        self.stream.slot().clear().await;
        self.metrics.active_sessions.set(0);

        let stopped = self.engine.stop().await;
        if stopped {
            info!("Engine stopped, all sessions closed");
        }
        stopped
    }

    /// Flag in-flight operations to wind down. Called on SIGTERM/Ctrl-C.
    pub fn request_shutdown(&self) {
        self.cancellation.cancel();
    }

    pub async fn shutdown(&self) {
        self.request_shutdown();
        self.stop_engine().await;
    }

    // ==================== Sessions ====================

    /// Allocate a context + page pair and return the session token.
    /// Starts the engine on first use.
    pub async fn create_session(
        &self,
        viewport: Option<ViewportSize>,
        user_agent: Option<String>,
    ) -> Result<String, ApiError> {
        self.ensure_started().await?;

        let context_id = Uuid::new_v4().to_string();
        self.registry
            .create_context(&context_id, viewport, user_agent)
            .await?;

        let session_id = self.sessions.create(context_id.clone()).await;
        if let Err(e) = self.registry.create_page(&session_id, &context_id).await {
            // Roll back so a failed create leaves nothing behind.
            self.sessions.remove(&session_id).await;
            let _ = self.registry.close_context(&context_id).await;
            return Err(e.into());
        }

        *self.stream_page.write().await = Some(session_id.clone());
        self.metrics
            .active_sessions
            .set(self.sessions.len().await as i64);

        info!("Session created: {} (context {})", session_id, context_id);
        Ok(session_id)
    }

    pub async fn close_session(&self, session_id: &str) -> Result<(), ApiError> {
        let Some(info) = self.sessions.remove(session_id).await else {
            return Err(ApiError::UnknownSession);
        };

        if let Err(e) = self.registry.close_context(&info.context_id).await {
            warn!("Context for session {} already gone: {}", session_id, e);
        }

        self.retarget_stream_after_close(session_id).await;
        self.metrics
            .active_sessions
            .set(self.sessions.len().await as i64);

        info!("Session closed: {}", session_id);
        Ok(())
    }

    async fn retarget_stream_after_close(&self, closed_session: &str) {
        let mut target = self.stream_page.write().await;
        if target.as_deref() == Some(closed_session) {
            *target = self.sessions.most_recent().await.map(|s| s.session_id);
            match target.as_deref() {
                Some(next) => info!("Stream now follows session {}", next),
                None => debug!("Stream left without a target page"),
            }
        }
    }

    /// Validate the session, refresh its activity, fetch its page.
    async fn page_for(&self, session_id: &str) -> Result<PageHandle, ApiError> {
        self.metrics.requests_total.inc();

        if self.sessions.touch(session_id).await.is_none() {
            warn!("Unknown session id: {}", abbreviate(session_id, 16));
            return Err(ApiError::UnknownSession);
        }

        match self.registry.get(session_id).await {
            Ok(page) => Ok(page),
            Err(e) => {
                warn!("Session {} has no live page: {}", session_id, e);
                Err(ApiError::UnknownSession)
            }
        }
    }

    // ==================== Dispatcher operations ====================

    pub async fn navigate(
        &self,
        session_id: &str,
        url: String,
        wait_until: WaitCondition,
        timeout_ms: u32,
    ) -> Result<NavigateOutcome, ApiError> {
        let page = self.page_for(session_id).await?;
        let ray_id = new_ray_id();
        let timeout_ms = effective_timeout(timeout_ms);

        debug!(
            ray_id = %ray_id,
            "Navigating session {} to {} (waitUntil: {}, timeout: {}ms)",
            abbreviate(session_id, 16),
            url,
            wait_until.as_str(),
            timeout_ms
        );

        let tab = page.tab.clone();
        let cancel = self.cancellation.clone();
        let nav_url = url.clone();
        let handle = tokio::task::spawn_blocking(move || -> anyhow::Result<NavigatedPage> {
            tab.navigate_to(&nav_url)?;
            wait_for_condition(&tab, wait_until, timeout_ms, &cancel)?;

            std::thread::sleep(Duration::from_millis(POST_NAVIGATION_SETTLE_MS));

            let title = tab.get_title()?;
            let content_length = tab.get_content().map(|c| c.len()).unwrap_or(0);
            let status = probe_http_status(&tab);
            Ok(NavigatedPage {
                url: tab.get_url(),
                title,
                status,
                content_length,
            })
        });

        let hard_timeout = Duration::from_millis(u64::from(timeout_ms))
            + Duration::from_secs(HARD_TIMEOUT_MARGIN_SECS);

        match self
            .run_blocking(&ray_id, "navigation", hard_timeout, handle)
            .await
        {
            Ok(nav) => {
                debug!(
                    ray_id = %ray_id,
                    "Navigation to {} complete: '{}' (status: {:?}, {} bytes)",
                    host_of(&nav.url).unwrap_or_else(|_| nav.url.clone()),
                    nav.title,
                    nav.status,
                    nav.content_length
                );
                Ok(NavigateOutcome {
                    success: true,
                    url: nav.url,
                    title: Some(nav.title),
                    status: nav.status,
                    content_length: Some(nav.content_length),
                    error: None,
                })
            }
            Err(e) => {
                self.metrics.requests_failed.inc();
                error!(ray_id = %ray_id, "Navigation failed: {}", e);
                Ok(NavigateOutcome::failed(url, e))
            }
        }
    }

    pub async fn screenshot(
        &self,
        session_id: &str,
        full_page: bool,
        quality: u32,
    ) -> Result<ScreenshotOutcome, ApiError> {
        let page = self.page_for(session_id).await?;
        let ray_id = new_ray_id();
        let quality = clamp_quality(quality);

        let tab = page.tab.clone();
        let handle = tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
            let clip = if full_page {
                full_page_clip(&tab)?
            } else {
                None
            };
            let bytes = tab.capture_screenshot(
                Page::CaptureScreenshotFormatOption::Jpeg,
                Some(quality),
                clip,
                true,
            )?;
            Ok(base64::engine::general_purpose::STANDARD.encode(&bytes))
        });

        match self
            .run_blocking(
                &ray_id,
                "screenshot",
                Duration::from_secs(READ_HARD_TIMEOUT_SECS),
                handle,
            )
            .await
        {
            Ok(encoded) => Ok(ScreenshotOutcome::ok(encoded)),
            Err(e) => {
                self.metrics.requests_failed.inc();
                warn!(ray_id = %ray_id, "Screenshot failed: {}", e);
                Ok(ScreenshotOutcome::failed(e))
            }
        }
    }

    pub async fn page_content(
        &self,
        session_id: &str,
        include_html: bool,
    ) -> Result<PageContentOutcome, ApiError> {
        let page = self.page_for(session_id).await?;
        let ray_id = new_ray_id();

        let tab = page.tab.clone();
        let handle = tokio::task::spawn_blocking(move || -> anyhow::Result<PageContentOutcome> {
            let title = tab.get_title()?;
            let url = tab.get_url();
            let text = tab
                .evaluate("document.body.innerText", false)?
                .value
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            let html = if include_html {
                Some(tab.get_content()?)
            } else {
                None
            };

            Ok(PageContentOutcome {
                success: true,
                url: Some(url),
                title: Some(title),
                text_content: Some(text),
                html_content: html,
                error: None,
            })
        });

        match self
            .run_blocking(
                &ray_id,
                "content read",
                Duration::from_secs(READ_HARD_TIMEOUT_SECS),
                handle,
            )
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.metrics.requests_failed.inc();
                warn!(ray_id = %ray_id, "Content read failed: {}", e);
                Ok(PageContentOutcome::failed(e))
            }
        }
    }

    pub async fn evaluate(
        &self,
        session_id: &str,
        script: String,
    ) -> Result<EvalOutcome, ApiError> {
        let page = self.page_for(session_id).await?;
        let ray_id = new_ray_id();

        debug!(
            ray_id = %ray_id,
            "Executing script on session {}: {}",
            abbreviate(session_id, 16),
            abbreviate(&script, 120)
        );

        let tab = page.tab.clone();
        let handle = tokio::task::spawn_blocking(move || -> anyhow::Result<Value> {
            let result = tab.evaluate(&script, true)?;
            Ok(result.value.unwrap_or(Value::Null))
        });

        match self
            .run_blocking(
                &ray_id,
                "script evaluation",
                Duration::from_secs(READ_HARD_TIMEOUT_SECS),
                handle,
            )
            .await
        {
            Ok(value) => Ok(EvalOutcome::ok(value)),
            Err(e) => {
                self.metrics.requests_failed.inc();
                debug!(ray_id = %ray_id, "Script evaluation failed: {}", e);
                Ok(EvalOutcome::failed(e))
            }
        }
    }

    pub async fn click(
        &self,
        session_id: &str,
        selector: String,
        timeout_ms: u32,
        button: MouseButton,
    ) -> Result<ActionOutcome, ApiError> {
        let page = self.page_for(session_id).await?;
        let ray_id = new_ray_id();
        let timeout_ms = if timeout_ms == 0 {
            DEFAULT_ELEMENT_TIMEOUT_MS
        } else {
            timeout_ms
        };

        debug!(
            ray_id = %ray_id,
            "Clicking '{}' ({:?}) on session {}",
            selector, button, abbreviate(session_id, 16)
        );

        let tab = page.tab.clone();
        let sel = selector.clone();
        let handle = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let element =
                tab.wait_for_element_with_custom_timeout(&sel, Duration::from_millis(u64::from(timeout_ms)))?;
            element.scroll_into_view()?;
            let midpoint = element.get_midpoint()?;
            cdp::click_at(&tab, midpoint.x, midpoint.y, button)?;
            Ok(())
        });

        let hard_timeout = Duration::from_millis(u64::from(timeout_ms))
            + Duration::from_secs(HARD_TIMEOUT_MARGIN_SECS);

        match self
            .run_blocking(&ray_id, "click", hard_timeout, handle)
            .await
        {
            Ok(()) => Ok(ActionOutcome::ok()),
            Err(e) => {
                self.metrics.requests_failed.inc();
                debug!(ray_id = %ray_id, "Click on '{}' failed: {}", selector, e);
                Ok(ActionOutcome::failed(e))
            }
        }
    }

    pub async fn type_text(
        &self,
        session_id: &str,
        selector: String,
        text: String,
        delay_ms: u64,
    ) -> Result<ActionOutcome, ApiError> {
        let page = self.page_for(session_id).await?;
        let ray_id = new_ray_id();

        debug!(
            ray_id = %ray_id,
            "Typing {} char(s) into '{}' on session {}",
            text.chars().count(),
            selector,
            abbreviate(session_id, 16)
        );

        // Per-character typing budget so slow typing is not cut off by the
        // hard timeout.
        let typing_budget =
            Duration::from_millis(delay_ms.saturating_mul(text.chars().count() as u64));

        let tab = page.tab.clone();
        let sel = selector.clone();
        let handle = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let element = tab.wait_for_element_with_custom_timeout(
                &sel,
                Duration::from_millis(u64::from(DEFAULT_ELEMENT_TIMEOUT_MS)),
            )?;
            element.click()?;

            // Replace, don't append: clear any existing value first.
            let clear = format!(
                "(() => {{ const el = document.querySelector({}); if (el) el.value = ''; }})()",
                serde_json::to_string(&sel)?
            );
            tab.evaluate(&clear, false)?;

            if delay_ms == 0 {
                tab.type_str(&text)?;
            } else {
                for ch in text.chars() {
                    tab.send_character(&ch.to_string())?;
                    std::thread::sleep(Duration::from_millis(delay_ms));
                }
            }
            Ok(())
        });

        let hard_timeout = Duration::from_millis(u64::from(DEFAULT_ELEMENT_TIMEOUT_MS))
            + typing_budget
            + Duration::from_secs(HARD_TIMEOUT_MARGIN_SECS);

        match self
            .run_blocking(&ray_id, "typing", hard_timeout, handle)
            .await
        {
            Ok(()) => Ok(ActionOutcome::ok()),
            Err(e) => {
                self.metrics.requests_failed.inc();
                debug!(ray_id = %ray_id, "Typing into '{}' failed: {}", selector, e);
                Ok(ActionOutcome::failed(e))
            }
        }
    }

    pub async fn element_text(
        &self,
        session_id: &str,
        selector: String,
    ) -> Result<ElementTextOutcome, ApiError> {
        let page = self.page_for(session_id).await?;
        let ray_id = new_ray_id();

        let tab = page.tab.clone();
        let sel = selector.clone();
        let handle = tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
            let element = tab.find_element(&sel)?;
            Ok(element.get_inner_text()?)
        });

        match self
            .run_blocking(
                &ray_id,
                "element read",
                Duration::from_secs(READ_HARD_TIMEOUT_SECS),
                handle,
            )
            .await
        {
            Ok(text) => Ok(ElementTextOutcome::ok(Some(text))),
            Err(e) => {
                self.metrics.requests_failed.inc();
                debug!(ray_id = %ray_id, "Element read '{}' failed: {}", selector, e);
                Ok(ElementTextOutcome::failed(e))
            }
        }
    }

    // ==================== Streaming ====================

    /// Start (or retune) the capture loop. The mapper viewport is fixed at
    /// this point for the lifetime of the stream session.
    pub async fn stream_start(
        &self,
        fps: Option<u32>,
        quality: Option<u32>,
    ) -> Result<StreamStatus, ApiError> {
        if !self.engine.is_started().await {
            return Err(ApiError::EngineNotStarted);
        }

        let fps = fps.unwrap_or(self.config.stream.default_fps);
        let quality = quality.unwrap_or(self.config.stream.default_quality);

        let viewport = match self.stream_page.read().await.clone() {
            Some(page_id) => self
                .registry
                .get(&page_id)
                .await
                .map(|p| p.viewport)
                .unwrap_or(self.config.engine.viewport),
            None => self.config.engine.viewport,
        };

        let source = Arc::new(RegistryFrameSource {
            registry: self.registry.clone(),
            stream_page: self.stream_page.clone(),
        });

        Ok(self.stream.start(source, fps, quality, viewport).await)
    }

    /// Stop the capture loop. Idempotent.
    pub async fn stream_stop(&self) -> StreamStatus {
        self.stream.stop().await;
        StreamStatus {
            active: false,
            fps: self.stream.fps(),
            quality: self.stream.quality(),
        }
    }

    pub async fn stream_settings(
        &self,
        fps: Option<u32>,
        quality: Option<u32>,
    ) -> StreamStatus {
        self.stream.update_settings(fps, quality).await
    }

    /// Click mapped from stream-container coordinates onto the stream's
    /// target page.
    pub async fn stream_click(
        &self,
        x: f64,
        y: f64,
        container_width: f64,
        container_height: f64,
    ) -> Result<StreamClickOutcome, ApiError> {
        let viewport = self.stream.viewport().await;
        let (mapped_x, mapped_y) =
            map_stream_click(x, y, container_width, container_height, viewport)
                .map_err(|e| ApiError::InvalidParameter(e.to_string()))?;

        if !self.engine.is_started().await {
            return Err(ApiError::EngineNotStarted);
        }

        let Some(page_id) = self.stream_page.read().await.clone() else {
            return Err(ApiError::EngineNotStarted);
        };
        self.sessions.touch(&page_id).await;

        let page = self
            .registry
            .get(&page_id)
            .await
            .map_err(|_| ApiError::UnknownSession)?;

        let ray_id = new_ray_id();
        debug!(
            ray_id = %ray_id,
            "Stream click ({:.1}, {:.1}) in {}x{} container -> viewport ({:.1}, {:.1})",
            x, y, container_width, container_height, mapped_x, mapped_y
        );

        let tab = page.tab.clone();
        let handle = tokio::task::spawn_blocking(move || {
            cdp::click_at(&tab, mapped_x, mapped_y, MouseButton::Left)
        });

        match self
            .run_blocking(
                &ray_id,
                "stream click",
                Duration::from_secs(READ_HARD_TIMEOUT_SECS),
                handle,
            )
            .await
        {
            Ok(()) => Ok(StreamClickOutcome {
                success: true,
                x: mapped_x,
                y: mapped_y,
                error: None,
            }),
            Err(e) => {
                self.metrics.requests_failed.inc();
                Ok(StreamClickOutcome {
                    success: false,
                    x: mapped_x,
                    y: mapped_y,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    // ==================== Housekeeping ====================

    pub async fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            status: "ok",
            engine_started: self.engine.is_started().await,
            sessions: self.sessions.len().await,
            streaming: self.stream.is_active().await,
            stream_fps: self.stream.fps(),
            stream_quality: self.stream.quality(),
        }
    }

    /// Background sweep closing sessions idle beyond the configured TTL.
    pub fn spawn_session_reaper(self: &Arc<Self>) {
        let lifecycle = self.config.session_lifecycle.clone();
        if lifecycle.max_idle_time.is_zero() {
            info!("Session reaper disabled (max_idle_time = 0)");
            return;
        }

        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = service.cancellation.cancelled() => break,
                    _ = tokio::time::sleep(lifecycle.sweep_interval) => {}
                }

                let expired = service.sessions.expired(lifecycle.max_idle_time).await;
                for session in expired {
                    info!(
                        "Reaping idle session {} (idle {:?}, {} request(s))",
                        session.session_id,
                        session.last_used_at.elapsed(),
                        session.request_count
                    );

                    service.sessions.remove(&session.session_id).await;
                    if let Err(e) = service.registry.close_context(&session.context_id).await {
                        warn!(
                            "Context cleanup for reaped session {} reported: {}",
                            session.session_id, e
                        );
                    }
                    service
                        .retarget_stream_after_close(&session.session_id)
                        .await;
                    service
                        .metrics
                        .active_sessions
                        .set(service.sessions.len().await as i64);
                }
            }
            debug!("Session reaper stopped");
        });
    }

    /// Race a blocking CDP task against shutdown and a hard timeout. On the
    /// timeout path the blocking task is abandoned — it unwinds on its own
    /// CDP deadline.
    async fn run_blocking<T: Send + 'static>(
        &self,
        ray_id: &str,
        what: &'static str,
        hard_timeout: Duration,
        task: tokio::task::JoinHandle<anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        tokio::select! {
            _ = self.cancellation.cancelled() => {
                anyhow::bail!("service is shutting down, please retry")
            }
            _ = tokio::time::sleep(hard_timeout) => {
                warn!(
                    ray_id = %ray_id,
                    "{} stuck - hard timeout after {:?}, abandoning the call",
                    what, hard_timeout
                );
                anyhow::bail!("{} stuck - hard timeout after {:?}", what, hard_timeout)
            }
            result = task => match result {
                Ok(inner) => inner,
                Err(e) => anyhow::bail!("{} task failed: {}", what, e),
            }
        }
    }
}

struct NavigatedPage {
    url: String,
    title: String,
    status: Option<u32>,
    content_length: usize,
}

fn new_ray_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// HTTP status of the main document, read via the Performance API. Returns
/// `None` when the page cannot tell (chrome error pages, very old entries).
fn probe_http_status(tab: &Tab) -> Option<u32> {
    let result = tab
        .evaluate(
            r#"
            (() => {
                try {
                    const nav = performance.getEntriesByType('navigation')[0];
                    if (nav && nav.responseStatus) {
                        return nav.responseStatus;
                    }
                    return 0;
                } catch (e) {
                    return 0;
                }
            })()
            "#,
            false,
        )
        .ok()?;

    match result.value.and_then(|v| v.as_u64()) {
        Some(0) | None => None,
        Some(status) => Some(status as u32),
    }
}

/// Document dimensions as a screenshot clip, for full-page captures.
fn full_page_clip(tab: &Tab) -> anyhow::Result<Option<Page::Viewport>> {
    let result = tab.evaluate(
        r#"JSON.stringify({
            width: Math.max(document.documentElement.scrollWidth, document.documentElement.clientWidth),
            height: Math.max(document.documentElement.scrollHeight, document.documentElement.clientHeight)
        })"#,
        false,
    )?;

    let Some(json) = result.value.and_then(|v| v.as_str().map(str::to_string)) else {
        return Ok(None);
    };

    #[derive(serde::Deserialize)]
    struct DocumentSize {
        width: f64,
        height: f64,
    }

    let size: DocumentSize = serde_json::from_str(&json)?;
    if size.width <= 0.0 || size.height <= 0.0 {
        return Ok(None);
    }

    Ok(Some(Page::Viewport {
        x: 0.0,
        y: 0.0,
        width: size.width,
        height: size.height,
        scale: 1.0,
    }))
}

/// Frame source backed by the registry's current stream-target page.
struct RegistryFrameSource {
    registry: Arc<PageRegistry>,
    stream_page: Arc<RwLock<Option<String>>>,
}

#[async_trait]
impl FrameSource for RegistryFrameSource {
    async fn grab_frame(&self, quality: u32) -> anyhow::Result<Option<Vec<u8>>> {
        let Some(page_id) = self.stream_page.read().await.clone() else {
            return Ok(None);
        };

        // The page may be mid-closure; that is an idle tick, not an error.
        let Ok(page) = self.registry.get(&page_id).await else {
            return Ok(None);
        };

        let tab = page.tab;
        let bytes = tokio::task::spawn_blocking(move || {
            tab.capture_screenshot(
                Page::CaptureScreenshotFormatOption::Jpeg,
                Some(quality),
                None,
                true,
            )
        })
        .await??;

        Ok(Some(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> Arc<BrowserService> {
        Arc::new(BrowserService::new(ServiceConfig::default()).unwrap())
    }

    // Engine-dependent paths are covered end-to-end against a real browser;
    // these tests pin the validation and streaming-state behavior that must
    // hold before the engine is ever touched.

    #[tokio::test]
    async fn test_navigate_rejects_unknown_session() {
        let service = service();
        let err = service
            .navigate("nope", "https://example.com".into(), WaitCondition::Load, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UnknownSession));
        assert_eq!(err.to_string(), "Invalid session ID");
    }

    #[tokio::test]
    async fn test_close_unknown_session() {
        let service = service();
        assert!(matches!(
            service.close_session("nope").await.unwrap_err(),
            ApiError::UnknownSession
        ));
    }

    #[tokio::test]
    async fn test_stream_start_requires_engine() {
        let service = service();
        let err = service.stream_start(Some(30), Some(80)).await.unwrap_err();
        assert!(matches!(err, ApiError::EngineNotStarted));
        assert_eq!(err.to_string(), "Browser not started");
    }

    #[tokio::test]
    async fn test_stream_settings_clamp_without_engine() {
        let service = service();
        let status = service.stream_settings(Some(500), Some(1)).await;
        assert!(!status.active);
        assert_eq!((status.fps, status.quality), (60, 10));
    }

    #[tokio::test]
    async fn test_stream_stop_is_idempotent() {
        let service = service();
        let status = service.stream_stop().await;
        assert!(!status.active);
        let status = service.stream_stop().await;
        assert!(!status.active);
    }

    #[tokio::test]
    async fn test_health_reports_cold_state() {
        let service = service();
        let health = service.health().await;
        assert_eq!(health.status, "ok");
        assert!(!health.engine_started);
        assert_eq!(health.sessions, 0);
        assert!(!health.streaming);
    }
}
