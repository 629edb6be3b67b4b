//! Maps click positions from a viewer's displayed stream container into
//! engine viewport pixel space.

use anyhow::Result;

use crate::types::ViewportSize;

/// Translate a click at `(x, y)` inside a container of
/// `container_width` x `container_height` display pixels into viewport
/// coordinates, scaling each axis independently.
///
/// Container dimensions must be positive; a zero-sized container would
/// otherwise map every click to infinity.
pub fn map_stream_click(
    x: f64,
    y: f64,
    container_width: f64,
    container_height: f64,
    viewport: ViewportSize,
) -> Result<(f64, f64)> {
    if container_width <= 0.0 || container_height <= 0.0 {
        anyhow::bail!(
            "containerWidth and containerHeight must be positive (got {}x{})",
            container_width,
            container_height
        );
    }

    let scale_x = f64::from(viewport.width) / container_width;
    let scale_y = f64::from(viewport.height) / container_height;

    Ok((x * scale_x, y * scale_y))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport(width: u32, height: u32) -> ViewportSize {
        ViewportSize { width, height }
    }

    #[test]
    fn test_half_size_container_doubles_coordinates() {
        let (x, y) = map_stream_click(100.0, 100.0, 640.0, 360.0, viewport(1280, 720)).unwrap();
        assert_eq!((x, y), (200.0, 200.0));
    }

    #[test]
    fn test_identity_when_container_matches_viewport() {
        let (x, y) = map_stream_click(333.0, 125.0, 1280.0, 720.0, viewport(1280, 720)).unwrap();
        assert_eq!((x, y), (333.0, 125.0));
    }

    #[test]
    fn test_axes_scale_independently() {
        // Container stretched horizontally only.
        let (x, y) = map_stream_click(100.0, 100.0, 2560.0, 720.0, viewport(1280, 720)).unwrap();
        assert_eq!((x, y), (50.0, 100.0));
    }

    #[test]
    fn test_origin_maps_to_origin() {
        let (x, y) = map_stream_click(0.0, 0.0, 977.0, 551.0, viewport(1280, 720)).unwrap();
        assert_eq!((x, y), (0.0, 0.0));
    }

    #[test]
    fn test_zero_container_rejected() {
        assert!(map_stream_click(10.0, 10.0, 0.0, 360.0, viewport(1280, 720)).is_err());
        assert!(map_stream_click(10.0, 10.0, 640.0, 0.0, viewport(1280, 720)).is_err());
    }

    #[test]
    fn test_negative_container_rejected() {
        assert!(map_stream_click(10.0, 10.0, -640.0, 360.0, viewport(1280, 720)).is_err());
    }
}
