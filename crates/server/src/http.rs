//! HTTP surface: JSON command endpoints plus the MJPEG stream.
//!
//! Every endpoint has an explicit request struct enumerating the options it
//! recognizes and their defaults; unknown wait conditions and mouse buttons
//! are rejected up front. All JSON responses go out with permissive CORS
//! headers; the MJPEG endpoint is the one non-JSON response in the service.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use periscope_common::{
    ActionOutcome, ElementTextOutcome, EvalOutcome, MouseButton, NavigateOutcome,
    PageContentOutcome, ScreenshotOutcome, StreamClickOutcome, ViewportSize, WaitCondition,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::service::{ApiError, BrowserService, HealthSnapshot};
use crate::stream::{mjpeg_stream, ViewerGuard, MJPEG_CONTENT_TYPE};

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::MissingField(_)
            | ApiError::UnknownSession
            | ApiError::EngineNotStarted
            | ApiError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
        };

        let body = Json(json!({ "success": false, "error": self.to_string() }));
        (status, body).into_response()
    }
}

// ==================== Request payloads ====================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SessionCreateRequest {
    viewport: Option<ViewportSize>,
    user_agent: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SessionCloseRequest {
    session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct NavigateRequest {
    session_id: Option<String>,
    url: Option<String>,
    /// One of `load`, `domcontentloaded`, `networkidle`. Default: `load`.
    wait_until: Option<String>,
    /// Milliseconds; 0 or absent means the service default.
    timeout: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ScreenshotRequest {
    session_id: Option<String>,
    /// Capture the whole document rather than just the viewport. Default:
    /// true.
    full_page: Option<bool>,
    /// JPEG quality, clamped to [10,100]. Default: 80.
    quality: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ContentRequest {
    session_id: Option<String>,
    include_html: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ExecuteRequest {
    session_id: Option<String>,
    script: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ClickRequest {
    session_id: Option<String>,
    selector: Option<String>,
    /// Milliseconds to wait for the element. Default: 5000.
    timeout: Option<u32>,
    /// One of `left`, `right`, `middle`. Default: `left`.
    button: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TypeRequest {
    session_id: Option<String>,
    selector: Option<String>,
    text: Option<String>,
    /// Per-character delay in milliseconds. Default: 50.
    delay: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ElementRequest {
    session_id: Option<String>,
    selector: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StreamTuneRequest {
    /// Clamped to [1,60].
    fps: Option<u32>,
    /// Clamped to [10,100].
    quality: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StreamClickRequest {
    x: Option<f64>,
    y: Option<f64>,
    /// Displayed stream container size; defaults to the engine viewport
    /// when the client does not report it.
    container_width: Option<f64>,
    container_height: Option<f64>,
}

// ==================== Response payloads ====================

#[derive(Debug, Serialize)]
struct SimpleResponse {
    success: bool,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionCreateResponse {
    success: bool,
    session_id: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct StreamStatusResponse {
    success: bool,
    fps: u32,
    quality: u32,
    message: String,
}

// ==================== Router ====================

pub fn api_router(service: Arc<BrowserService>) -> Router {
    Router::new()
        .route("/api/browser/start", post(browser_start))
        .route("/api/browser/stop", post(browser_stop))
        .route("/api/session/create", post(session_create))
        .route("/api/session/close", post(session_close))
        .route("/api/navigate", post(navigate))
        .route("/api/screenshot", post(screenshot))
        .route("/api/content", post(content))
        .route("/api/execute", post(execute))
        .route("/api/click", post(click))
        .route("/api/type", post(type_text))
        .route("/api/element", post(element))
        .route("/api/stream/start", post(stream_start))
        .route("/api/stream/stop", post(stream_stop))
        .route("/api/stream/settings", post(stream_settings))
        .route("/api/stream/mjpeg", get(stream_mjpeg))
        .route("/api/click/stream", post(stream_click))
        .route("/health", get(health))
        .layer(cors_layer())
        .with_state(service)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

fn require<T>(value: Option<T>, field: &'static str) -> Result<T, ApiError> {
    value.ok_or(ApiError::MissingField(field))
}

fn parse_wait_until(raw: Option<String>) -> Result<WaitCondition, ApiError> {
    match raw {
        None => Ok(WaitCondition::default()),
        Some(s) => WaitCondition::from_str(&s).map_err(|_| {
            ApiError::InvalidParameter(format!(
                "Unknown waitUntil: '{}'. Available: load, domcontentloaded, networkidle",
                s
            ))
        }),
    }
}

fn parse_button(raw: Option<String>) -> Result<MouseButton, ApiError> {
    match raw {
        None => Ok(MouseButton::default()),
        Some(s) => MouseButton::from_str(&s).map_err(|_| {
            ApiError::InvalidParameter(format!(
                "Unknown button: '{}'. Available: left, right, middle",
                s
            ))
        }),
    }
}

// ==================== Handlers ====================

async fn browser_start(
    State(service): State<Arc<BrowserService>>,
) -> Result<Json<SimpleResponse>, ApiError> {
    let started = service.start_engine().await?;
    Ok(Json(SimpleResponse {
        success: true,
        message: if started {
            "Browser started successfully".to_string()
        } else {
            "Browser already running".to_string()
        },
    }))
}

async fn browser_stop(
    State(service): State<Arc<BrowserService>>,
) -> Result<Json<SimpleResponse>, ApiError> {
    service.stop_engine().await;
    Ok(Json(SimpleResponse {
        success: true,
        message: "Browser stopped successfully".to_string(),
    }))
}

async fn session_create(
    State(service): State<Arc<BrowserService>>,
    payload: Option<Json<SessionCreateRequest>>,
) -> Result<Json<SessionCreateResponse>, ApiError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let session_id = service
        .create_session(request.viewport, request.user_agent)
        .await?;

    Ok(Json(SessionCreateResponse {
        success: true,
        session_id,
        message: "Session created successfully".to_string(),
    }))
}

async fn session_close(
    State(service): State<Arc<BrowserService>>,
    payload: Option<Json<SessionCloseRequest>>,
) -> Result<Json<SimpleResponse>, ApiError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let session_id = require(request.session_id, "sessionId")?;
    service.close_session(&session_id).await?;

    Ok(Json(SimpleResponse {
        success: true,
        message: "Session closed successfully".to_string(),
    }))
}

async fn navigate(
    State(service): State<Arc<BrowserService>>,
    payload: Option<Json<NavigateRequest>>,
) -> Result<Json<NavigateOutcome>, ApiError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let session_id = require(request.session_id, "sessionId")?;
    let url = require(request.url, "url")?;
    let wait_until = parse_wait_until(request.wait_until)?;

    let outcome = service
        .navigate(&session_id, url, wait_until, request.timeout.unwrap_or(0))
        .await?;
    Ok(Json(outcome))
}

async fn screenshot(
    State(service): State<Arc<BrowserService>>,
    payload: Option<Json<ScreenshotRequest>>,
) -> Result<Json<ScreenshotOutcome>, ApiError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let session_id = require(request.session_id, "sessionId")?;

    let outcome = service
        .screenshot(
            &session_id,
            request.full_page.unwrap_or(true),
            request.quality.unwrap_or(80),
        )
        .await?;
    Ok(Json(outcome))
}

async fn content(
    State(service): State<Arc<BrowserService>>,
    payload: Option<Json<ContentRequest>>,
) -> Result<Json<PageContentOutcome>, ApiError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let session_id = require(request.session_id, "sessionId")?;

    let outcome = service
        .page_content(&session_id, request.include_html.unwrap_or(false))
        .await?;
    Ok(Json(outcome))
}

async fn execute(
    State(service): State<Arc<BrowserService>>,
    payload: Option<Json<ExecuteRequest>>,
) -> Result<Json<EvalOutcome>, ApiError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let session_id = require(request.session_id, "sessionId")?;
    let script = require(request.script, "script")?;

    let outcome = service.evaluate(&session_id, script).await?;
    Ok(Json(outcome))
}

async fn click(
    State(service): State<Arc<BrowserService>>,
    payload: Option<Json<ClickRequest>>,
) -> Result<Json<ActionOutcome>, ApiError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let session_id = require(request.session_id, "sessionId")?;
    let selector = require(request.selector, "selector")?;
    let button = parse_button(request.button)?;

    let outcome = service
        .click(&session_id, selector, request.timeout.unwrap_or(0), button)
        .await?;
    Ok(Json(outcome))
}

async fn type_text(
    State(service): State<Arc<BrowserService>>,
    payload: Option<Json<TypeRequest>>,
) -> Result<Json<ActionOutcome>, ApiError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let session_id = require(request.session_id, "sessionId")?;
    let selector = require(request.selector, "selector")?;
    let text = require(request.text, "text")?;

    let outcome = service
        .type_text(&session_id, selector, text, request.delay.unwrap_or(50))
        .await?;
    Ok(Json(outcome))
}

async fn element(
    State(service): State<Arc<BrowserService>>,
    payload: Option<Json<ElementRequest>>,
) -> Result<Json<ElementTextOutcome>, ApiError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let session_id = require(request.session_id, "sessionId")?;
    let selector = require(request.selector, "selector")?;

    let outcome = service.element_text(&session_id, selector).await?;
    Ok(Json(outcome))
}

async fn stream_start(
    State(service): State<Arc<BrowserService>>,
    payload: Option<Json<StreamTuneRequest>>,
) -> Result<Json<StreamStatusResponse>, ApiError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let status = service.stream_start(request.fps, request.quality).await?;

    Ok(Json(StreamStatusResponse {
        success: true,
        fps: status.fps,
        quality: status.quality,
        message: format!(
            "Streaming started at {} FPS with quality {}",
            status.fps, status.quality
        ),
    }))
}

async fn stream_stop(
    State(service): State<Arc<BrowserService>>,
) -> Result<Json<SimpleResponse>, ApiError> {
    service.stream_stop().await;
    Ok(Json(SimpleResponse {
        success: true,
        message: "Streaming stopped".to_string(),
    }))
}

async fn stream_settings(
    State(service): State<Arc<BrowserService>>,
    payload: Option<Json<StreamTuneRequest>>,
) -> Result<Json<StreamStatusResponse>, ApiError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let status = service
        .stream_settings(request.fps, request.quality)
        .await;

    Ok(Json(StreamStatusResponse {
        success: true,
        fps: status.fps,
        quality: status.quality,
        message: format!(
            "Stream settings updated: {} FPS, quality {}",
            status.fps, status.quality
        ),
    }))
}

/// The one non-JSON endpoint: an endless multipart stream of JPEG frames.
async fn stream_mjpeg(State(service): State<Arc<BrowserService>>) -> Response {
    let guard = ViewerGuard::new(service.metrics().stream_viewers.clone());
    let stream = mjpeg_stream(service.frame_slot(), guard);

    (
        [
            (header::CONTENT_TYPE, MJPEG_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn stream_click(
    State(service): State<Arc<BrowserService>>,
    payload: Option<Json<StreamClickRequest>>,
) -> Result<Json<StreamClickOutcome>, ApiError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let viewport = service.config().engine.viewport;

    let outcome = service
        .stream_click(
            request.x.unwrap_or(0.0),
            request.y.unwrap_or(0.0),
            request
                .container_width
                .unwrap_or(f64::from(viewport.width)),
            request
                .container_height
                .unwrap_or(f64::from(viewport.height)),
        )
        .await?;
    Ok(Json(outcome))
}

async fn health(State(service): State<Arc<BrowserService>>) -> Json<HealthSnapshot> {
    Json(service.health().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use periscope_common::ServiceConfig;
    use serde_json::Value;
    use tower::ServiceExt;

    fn router() -> Router {
        let service = Arc::new(BrowserService::new(ServiceConfig::default()).unwrap());
        api_router(service)
    }

    async fn post_json(router: Router, path: &str, body: Value) -> (StatusCode, Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(path)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    // ==================== Validation Tests ====================

    #[tokio::test]
    async fn test_navigate_without_session_id() {
        let (status, body) = post_json(
            router(),
            "/api/navigate",
            serde_json::json!({ "url": "https://example.com" }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "sessionId is required");
    }

    #[tokio::test]
    async fn test_navigate_unknown_session() {
        let (status, body) = post_json(
            router(),
            "/api/navigate",
            serde_json::json!({ "sessionId": "nope", "url": "https://example.com" }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid session ID");
    }

    #[tokio::test]
    async fn test_navigate_rejects_unknown_wait_condition() {
        let (status, body) = post_json(
            router(),
            "/api/navigate",
            serde_json::json!({
                "sessionId": "s", "url": "https://example.com", "waitUntil": "networkidle2"
            }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("waitUntil"));
    }

    #[tokio::test]
    async fn test_execute_without_script() {
        let (status, body) = post_json(
            router(),
            "/api/execute",
            serde_json::json!({ "sessionId": "s" }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "script is required");
    }

    #[tokio::test]
    async fn test_click_rejects_unknown_button() {
        let (status, body) = post_json(
            router(),
            "/api/click",
            serde_json::json!({ "sessionId": "s", "selector": "#go", "button": "back" }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("button"));
    }

    // ==================== Streaming Tests ====================

    #[tokio::test]
    async fn test_stream_settings_clamp() {
        let (status, body) = post_json(
            router(),
            "/api/stream/settings",
            serde_json::json!({ "fps": 500, "quality": 1 }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["fps"], 60);
        assert_eq!(body["quality"], 10);
    }

    #[tokio::test]
    async fn test_stream_start_without_engine() {
        let (status, body) = post_json(
            router(),
            "/api/stream/start",
            serde_json::json!({ "fps": 30 }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Browser not started");
    }

    #[tokio::test]
    async fn test_stream_stop_without_stream() {
        let (status, body) = post_json(router(), "/api/stream/stop", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn test_stream_click_rejects_zero_container() {
        let (status, body) = post_json(
            router(),
            "/api/click/stream",
            serde_json::json!({ "x": 10, "y": 10, "containerWidth": 0, "containerHeight": 360 }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("containerWidth and containerHeight"));
    }

    // ==================== Misc ====================

    #[tokio::test]
    async fn test_health() {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["engine_started"], false);
        assert_eq!(body["sessions"], 0);
    }

    #[tokio::test]
    async fn test_session_close_unknown() {
        let (status, body) = post_json(
            router(),
            "/api/session/close",
            serde_json::json!({ "sessionId": "stale" }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid session ID");
    }
}
