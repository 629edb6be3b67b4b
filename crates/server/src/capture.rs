//! Frame capture loop and the latest-frame slot.
//!
//! The loop is the single writer of the slot; any number of stream viewers
//! read it. State machine: Stopped → Running → Stopped. Starting while
//! running only retunes fps/quality — it never spawns a second task — and
//! `stop()` raises a flag the loop observes at the top of its next
//! iteration, so the loop is never force-cancelled mid-capture.

use async_trait::async_trait;
use periscope_common::{clamp_fps, clamp_quality, ViewportSize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::Metrics;

/// Delay before re-checking for a page when none is registered yet.
const PAGE_ABSENT_DELAY: Duration = Duration::from_millis(100);

/// Backoff after a capture fault, so a broken page cannot spin the loop.
const CAPTURE_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// One captured, encoded frame.
#[derive(Clone)]
pub struct Frame {
    pub bytes: Arc<Vec<u8>>,
    pub captured_at: Instant,
}

/// Single-writer / multi-reader cell holding the most recent frame.
///
/// The writer swaps whole frames under the write lock, so readers never see
/// a partially written frame. Readers clone the cheap handle under the read
/// lock and stream the bytes after releasing it.
#[derive(Default)]
pub struct FrameSlot {
    cell: RwLock<Option<Frame>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, bytes: Vec<u8>) {
        let frame = Frame {
            bytes: Arc::new(bytes),
            captured_at: Instant::now(),
        };
        *self.cell.write().await = Some(frame);
    }

    pub async fn latest(&self) -> Option<Frame> {
        self.cell.read().await.clone()
    }

    pub async fn clear(&self) {
        *self.cell.write().await = None;
    }
}

/// Source of encoded frames for the capture loop.
///
/// `Ok(None)` means "no page to capture right now" — the loop idles briefly
/// instead of treating that as an error.
#[async_trait]
pub trait FrameSource: Send + Sync + 'static {
    async fn grab_frame(&self, quality: u32) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Settings and liveness snapshot of the stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamStatus {
    pub active: bool,
    pub fps: u32,
    pub quality: u32,
}

struct CaptureTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owner of the capture loop and the latest-frame slot.
pub struct StreamController {
    slot: Arc<FrameSlot>,
    fps: Arc<AtomicU32>,
    quality: Arc<AtomicU32>,
    /// Viewport used by the coordinate mapper; fixed when streaming starts.
    viewport: RwLock<ViewportSize>,
    task: Mutex<Option<CaptureTask>>,
    metrics: Metrics,
}

impl StreamController {
    pub fn new(metrics: Metrics, default_fps: u32, default_quality: u32) -> Self {
        Self {
            slot: Arc::new(FrameSlot::new()),
            fps: Arc::new(AtomicU32::new(clamp_fps(default_fps))),
            quality: Arc::new(AtomicU32::new(clamp_quality(default_quality))),
            viewport: RwLock::new(ViewportSize::default()),
            task: Mutex::new(None),
            metrics,
        }
    }

    pub fn slot(&self) -> Arc<FrameSlot> {
        self.slot.clone()
    }

    pub fn fps(&self) -> u32 {
        self.fps.load(Ordering::Relaxed)
    }

    pub fn quality(&self) -> u32 {
        self.quality.load(Ordering::Relaxed)
    }

    /// Viewport the current stream session maps clicks against.
    pub async fn viewport(&self) -> ViewportSize {
        *self.viewport.read().await
    }

    /// Start the capture loop, or retune it if it is already running.
    ///
    /// Out-of-range fps/quality are clamped. The viewport is recorded only
    /// when a fresh loop starts: it stays fixed for the lifetime of one
    /// stream session.
    pub async fn start(
        &self,
        source: Arc<dyn FrameSource>,
        fps: u32,
        quality: u32,
        viewport: ViewportSize,
    ) -> StreamStatus {
        let fps = clamp_fps(fps);
        let quality = clamp_quality(quality);
        self.fps.store(fps, Ordering::Relaxed);
        self.quality.store(quality, Ordering::Relaxed);

        let mut task = self.task.lock().await;

        if let Some(existing) = task.as_ref() {
            if !existing.handle.is_finished() {
                info!(
                    "Capture loop already running - settings updated to {} fps / quality {}",
                    fps, quality
                );
                return self.snapshot(true);
            }
        }

        *self.viewport.write().await = viewport;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(capture_loop(
            source,
            self.slot.clone(),
            self.fps.clone(),
            self.quality.clone(),
            cancel.clone(),
            self.metrics.clone(),
        ));
        *task = Some(CaptureTask { cancel, handle });

        info!(
            "Capture loop started at {} fps / quality {} (viewport {})",
            fps, quality, viewport
        );
        self.snapshot(true)
    }

    /// Request the loop to stop. Returns `false` if it was not running.
    ///
    /// The flag is observed at the top of the next iteration; there is no
    /// forced cancellation.
    pub async fn stop(&self) -> bool {
        let mut task = self.task.lock().await;

        match task.take() {
            Some(existing) => {
                existing.cancel.cancel();
                info!("Capture loop stop requested");
                true
            }
            None => false,
        }
    }

    /// Retune fps/quality without touching the loop state.
    pub async fn update_settings(&self, fps: Option<u32>, quality: Option<u32>) -> StreamStatus {
        if let Some(fps) = fps {
            self.fps.store(clamp_fps(fps), Ordering::Relaxed);
        }
        if let Some(quality) = quality {
            self.quality.store(clamp_quality(quality), Ordering::Relaxed);
        }

        let active = self.is_active().await;
        info!(
            "Stream settings now {} fps / quality {} (active: {})",
            self.fps(),
            self.quality(),
            active
        );
        self.snapshot(active)
    }

    pub async fn is_active(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .map(|t| !t.handle.is_finished())
            .unwrap_or(false)
    }

    fn snapshot(&self, active: bool) -> StreamStatus {
        StreamStatus {
            active,
            fps: self.fps(),
            quality: self.quality(),
        }
    }
}

async fn capture_loop(
    source: Arc<dyn FrameSource>,
    slot: Arc<FrameSlot>,
    fps: Arc<AtomicU32>,
    quality: Arc<AtomicU32>,
    cancel: CancellationToken,
    metrics: Metrics,
) {
    debug!("Capture loop running");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let quality = quality.load(Ordering::Relaxed);
        match source.grab_frame(quality).await {
            Ok(Some(bytes)) => {
                slot.publish(bytes).await;
                metrics.frames_captured.inc();

                let fps = fps.load(Ordering::Relaxed).max(1);
                tokio::time::sleep(Duration::from_secs_f64(1.0 / f64::from(fps))).await;
            }
            Ok(None) => {
                tokio::time::sleep(PAGE_ABSENT_DELAY).await;
            }
            Err(e) => {
                warn!("Frame capture failed: {} - backing off", e);
                tokio::time::sleep(CAPTURE_ERROR_BACKOFF).await;
            }
        }
    }

    debug!("Capture loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    /// Frame source that counts grabs and replays a scripted reply.
    struct ScriptedSource {
        grabs: AtomicU64,
        errors_first: u64,
        page_absent: bool,
    }

    impl ScriptedSource {
        fn working() -> Arc<Self> {
            Arc::new(Self {
                grabs: AtomicU64::new(0),
                errors_first: 0,
                page_absent: false,
            })
        }

        fn grab_count(&self) -> u64 {
            self.grabs.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn grab_frame(&self, quality: u32) -> anyhow::Result<Option<Vec<u8>>> {
            let n = self.grabs.fetch_add(1, Ordering::Relaxed);
            if n < self.errors_first {
                anyhow::bail!("scripted capture fault");
            }
            if self.page_absent {
                return Ok(None);
            }
            Ok(Some(vec![quality as u8, n as u8]))
        }
    }

    fn controller() -> StreamController {
        StreamController::new(Metrics::new().unwrap(), 30, 80)
    }

    // ==================== State Machine Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_second_start_retunes_without_second_task() {
        let controller = controller();
        let first = ScriptedSource::working();
        let second = ScriptedSource::working();

        let status = controller
            .start(first.clone(), 30, 80, ViewportSize::default())
            .await;
        assert!(status.active);
        assert_eq!((status.fps, status.quality), (30, 80));

        let status = controller
            .start(second.clone(), 10, 50, ViewportSize::default())
            .await;
        assert!(status.active);
        assert_eq!((status.fps, status.quality), (10, 50));

        tokio::time::sleep(Duration::from_millis(500)).await;

        // Only the loop spawned by the first start is grabbing frames.
        assert!(first.grab_count() > 0);
        assert_eq!(second.grab_count(), 0);
        assert!(controller.is_active().await);

        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_then_start_runs_fresh_loop() {
        let controller = controller();
        let source = ScriptedSource::working();

        controller
            .start(source.clone(), 30, 80, ViewportSize::default())
            .await;
        assert!(controller.stop().await);
        assert!(!controller.is_active().await);
        assert!(!controller.stop().await);

        let restarted = ScriptedSource::working();
        let status = controller
            .start(restarted.clone(), 15, 60, ViewportSize::default())
            .await;
        assert!(status.active);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(restarted.grab_count() > 0);

        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_settings_are_clamped() {
        let controller = controller();
        let source = ScriptedSource::working();

        let status = controller
            .start(source, 0, 500, ViewportSize::default())
            .await;
        assert_eq!((status.fps, status.quality), (1, 100));

        let status = controller.update_settings(Some(999), Some(0)).await;
        assert_eq!((status.fps, status.quality), (60, 10));

        controller.stop().await;
    }

    // ==================== Slot Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_slot_holds_most_recent_frame() {
        let controller = controller();
        let source = ScriptedSource::working();
        let slot = controller.slot();

        controller
            .start(source.clone(), 60, 80, ViewportSize::default())
            .await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        controller.stop().await;

        // A viewer attaching late sees the latest frame, not frame 1.
        let frame = slot.latest().await.expect("frame published");
        assert!(frame.bytes[1] as u64 >= 1);
        assert!(source.grab_count() > 1);
    }

    #[tokio::test]
    async fn test_slot_publish_replaces_whole_frame() {
        let slot = FrameSlot::new();
        assert!(slot.latest().await.is_none());

        slot.publish(vec![1, 1, 1]).await;
        slot.publish(vec![2, 2]).await;

        let frame = slot.latest().await.unwrap();
        assert_eq!(*frame.bytes, vec![2, 2]);

        slot.clear().await;
        assert!(slot.latest().await.is_none());
    }

    // ==================== Fault Tolerance Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_capture_faults() {
        let controller = controller();
        let source = Arc::new(ScriptedSource {
            grabs: AtomicU64::new(0),
            errors_first: 3,
            page_absent: false,
        });

        controller
            .start(source.clone(), 30, 80, ViewportSize::default())
            .await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        // Faulted three times, then recovered and kept publishing.
        assert!(source.grab_count() > 3);
        assert!(controller.slot().latest().await.is_some());
        assert!(controller.is_active().await);

        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_idles_when_page_absent() {
        let controller = controller();
        let source = Arc::new(ScriptedSource {
            grabs: AtomicU64::new(0),
            errors_first: 0,
            page_absent: true,
        });

        controller
            .start(source.clone(), 30, 80, ViewportSize::default())
            .await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(source.grab_count() > 1);
        assert!(controller.slot().latest().await.is_none());
        assert!(controller.is_active().await);

        controller.stop().await;
    }
}
