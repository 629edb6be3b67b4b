//! MJPEG multiplexer.
//!
//! Every viewer gets its own infinite multipart sequence over the shared
//! latest-frame slot. A viewer snapshots the slot under its read lock and
//! streams the bytes after releasing it, so a slow consumer never blocks
//! the capture loop or other viewers, and viewers attach/detach freely.

use axum::body::Bytes;
use futures::Stream;
use prometheus::IntGauge;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use crate::capture::{Frame, FrameSlot};

pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Delay between slot polls, decoupling viewer output rate from capture
/// rate.
const VIEWER_POLL_DELAY: Duration = Duration::from_millis(10);

/// RAII counter for attached viewers; detaching (dropping the body) takes
/// the gauge back down.
pub struct ViewerGuard {
    gauge: IntGauge,
}

impl ViewerGuard {
    pub fn new(gauge: IntGauge) -> Self {
        gauge.inc();
        Self { gauge }
    }
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

fn encode_frame_part(frame: &Frame) -> Bytes {
    let mut part = Vec::with_capacity(frame.bytes.len() + 64);
    part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(&frame.bytes);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

/// One viewer's endless part sequence. Each call produces an independent
/// stream; none of them is restartable.
pub fn mjpeg_stream(
    slot: Arc<FrameSlot>,
    guard: ViewerGuard,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    futures::stream::unfold((slot, guard), |(slot, guard)| async move {
        loop {
            tokio::time::sleep(VIEWER_POLL_DELAY).await;
            if let Some(frame) = slot.latest().await {
                let part = encode_frame_part(&frame);
                return Some((Ok(part), (slot, guard)));
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use futures::StreamExt;

    fn viewer_guard(metrics: &Metrics) -> ViewerGuard {
        ViewerGuard::new(metrics.stream_viewers.clone())
    }

    #[tokio::test]
    async fn test_part_layout() {
        let slot = FrameSlot::new();
        slot.publish(vec![0xFF, 0xD8, 0xFF]).await;
        let frame = slot.latest().await.unwrap();

        let part = encode_frame_part(&frame);
        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(part.ends_with(b"\xFF\xD8\xFF\r\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_emits_latest_frame() {
        let metrics = Metrics::new().unwrap();
        let slot = Arc::new(FrameSlot::new());
        slot.publish(vec![1]).await;
        slot.publish(vec![2]).await;

        let mut stream = Box::pin(mjpeg_stream(slot, viewer_guard(&metrics)));
        let part = stream.next().await.unwrap().unwrap();
        assert!(part.ends_with(b"\x02\r\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_waits_for_first_frame() {
        let metrics = Metrics::new().unwrap();
        let slot = Arc::new(FrameSlot::new());

        let publisher = {
            let slot = slot.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                slot.publish(vec![7]).await;
            })
        };

        let mut stream = Box::pin(mjpeg_stream(slot, viewer_guard(&metrics)));
        let part = stream.next().await.unwrap().unwrap();
        assert!(part.ends_with(b"\x07\r\n"));
        publisher.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewer_gauge_tracks_attach_detach() {
        let metrics = Metrics::new().unwrap();
        let slot = Arc::new(FrameSlot::new());
        slot.publish(vec![1]).await;

        {
            let _a = Box::pin(mjpeg_stream(slot.clone(), viewer_guard(&metrics)));
            let _b = Box::pin(mjpeg_stream(slot.clone(), viewer_guard(&metrics)));
            assert_eq!(metrics.stream_viewers.get(), 2);
        }

        assert_eq!(metrics.stream_viewers.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewers_are_independent() {
        let metrics = Metrics::new().unwrap();
        let slot = Arc::new(FrameSlot::new());
        slot.publish(vec![9]).await;

        let mut fast = Box::pin(mjpeg_stream(slot.clone(), viewer_guard(&metrics)));
        let mut late = Box::pin(mjpeg_stream(slot.clone(), viewer_guard(&metrics)));

        // The fast viewer drains several parts; the late one still gets the
        // current frame on its first read.
        for _ in 0..3 {
            fast.next().await.unwrap().unwrap();
        }
        let part = late.next().await.unwrap().unwrap();
        assert!(part.ends_with(b"\x09\r\n"));
    }
}
