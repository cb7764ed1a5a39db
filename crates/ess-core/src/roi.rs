//! ROI geometry and hotspot reduction.
//!
//! The ROI is fixed for the lifetime of the capture daemon: computed once
//! from the configured size, centered on the frame, and clamped so it never
//! leaves the frame. Each captured frame is then reduced to min/max and the
//! position of the maximum by scanning only the ROI.

use ess_types::{Hotspot, PixelPos, Roi};

/// Frame dimensions of a thermal sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameGeometry {
    /// Columns.
    pub width: u32,
    /// Rows.
    pub height: u32,
}

impl FrameGeometry {
    /// MLX90640 frame: 32 x 24.
    pub const MLX90640: Self = Self {
        width: 32,
        height: 24,
    };

    /// Number of pixels in a full frame.
    pub fn pixel_count(self) -> usize {
        usize::try_from(u64::from(self.width).saturating_mul(u64::from(self.height)))
            .unwrap_or(usize::MAX)
    }

    /// Row-major index of `(x, y)`, or `None` outside the frame.
    pub fn index(self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = u64::from(y)
            .checked_mul(u64::from(self.width))?
            .checked_add(u64::from(x))?;
        usize::try_from(idx).ok()
    }
}

/// Center a `roi_w` x `roi_h` rectangle on the frame.
///
/// The origin is clamped into the frame and each dimension is clamped so the
/// rectangle never exceeds the frame bounds. A zero dimension stays zero;
/// callers treat the resulting empty ROI as "no reading".
pub fn center_roi(geometry: FrameGeometry, roi_w: u32, roi_h: u32) -> Roi {
    let (x0, w) = center_span(geometry.width, roi_w);
    let (y0, h) = center_span(geometry.height, roi_h);
    Roi::new(x0, y0, w, h)
}

fn center_span(frame: u32, requested: u32) -> (u32, u32) {
    let origin = (frame.saturating_sub(requested) / 2).min(frame.saturating_sub(1));
    let span = requested.min(frame.saturating_sub(origin));
    (origin, span)
}

/// Reduce the ROI of a row-major frame to its hotspot.
///
/// Only pixels inside `roi` are visited, in row-major order. The reported
/// position is the first pixel holding the maximum: later pixels with an
/// equal value do not replace it. Non-finite pixels are skipped.
///
/// Returns `None` when the ROI is empty or holds no finite pixel.
pub fn roi_min_max(frame: &[f32], geometry: FrameGeometry, roi: Roi) -> Option<Hotspot> {
    if roi.is_empty() {
        return None;
    }

    let mut min_c = f32::INFINITY;
    let mut max_c = f32::NEG_INFINITY;
    let mut max_pos: Option<PixelPos> = None;

    let y_end = roi.y0.saturating_add(roi.h).min(geometry.height);
    let x_end = roi.x0.saturating_add(roi.w).min(geometry.width);
    for y in roi.y0..y_end {
        for x in roi.x0..x_end {
            let Some(&value) = geometry.index(x, y).and_then(|idx| frame.get(idx)) else {
                continue;
            };
            if !value.is_finite() {
                continue;
            }
            if value < min_c {
                min_c = value;
            }
            if max_pos.is_none() || value > max_c {
                max_c = value;
                max_pos = Some(PixelPos::new(x, y));
            }
        }
    }

    let max_pos = max_pos?;
    Some(Hotspot {
        min_c: Some(widen(min_c)),
        max_c: widen(max_c),
        max_pos: Some(max_pos),
        max_pos_roi: Some(roi.relative(max_pos)),
    })
}

/// Widen through the shortest decimal form, so `41.7f32` becomes `41.7`
/// rather than `41.70000076293945`.
fn widen(value: f32) -> f64 {
    value.to_string().parse().unwrap_or_else(|_| f64::from(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::indexing_slicing)]
mod tests {
    use super::*;

    const GEO: FrameGeometry = FrameGeometry::MLX90640;

    fn flat_frame(value: f32) -> Vec<f32> {
        vec![value; GEO.pixel_count()]
    }

    fn set(frame: &mut [f32], x: u32, y: u32, value: f32) {
        let idx = GEO.index(x, y).unwrap();
        frame[idx] = value;
    }

    #[test]
    fn default_roi_is_centered() {
        assert_eq!(center_roi(GEO, 7, 20), Roi::new(12, 2, 7, 20));
        assert_eq!(center_roi(GEO, 32, 24), Roi::new(0, 0, 32, 24));
    }

    #[test]
    fn oversized_roi_is_clamped() {
        assert_eq!(center_roi(GEO, 100, 100), Roi::new(0, 0, 32, 24));
        assert_eq!(center_roi(GEO, 40, 3), Roi::new(0, 10, 32, 3));
    }

    #[test]
    fn zero_size_roi_is_empty() {
        let roi = center_roi(GEO, 0, 20);
        assert!(roi.is_empty());
        assert_eq!(roi.x0, 16);
        assert!(roi_min_max(&flat_frame(20.0), GEO, roi).is_none());
    }

    #[test]
    fn hotspot_found_inside_roi() {
        let roi = center_roi(GEO, 7, 20);
        let mut frame = flat_frame(21.0);
        set(&mut frame, 14, 9, 48.5);
        set(&mut frame, 13, 4, 18.0);
        let hot = roi_min_max(&frame, GEO, roi).unwrap();
        assert_eq!(hot.max_c, 48.5);
        assert_eq!(hot.min_c, Some(18.0));
        assert_eq!(hot.max_pos, Some(PixelPos::new(14, 9)));
        assert_eq!(hot.max_pos_roi, Some(PixelPos::new(2, 7)));
    }

    #[test]
    fn pixels_outside_roi_are_ignored() {
        let roi = center_roi(GEO, 7, 20);
        let mut frame = flat_frame(21.0);
        set(&mut frame, 0, 0, 99.0);
        set(&mut frame, 31, 23, -40.0);
        let hot = roi_min_max(&frame, GEO, roi).unwrap();
        assert_eq!(hot.max_c, 21.0);
        assert_eq!(hot.min_c, Some(21.0));
    }

    #[test]
    fn ties_keep_first_in_row_major_order() {
        let roi = center_roi(GEO, 7, 20);
        let mut frame = flat_frame(21.0);
        set(&mut frame, 16, 5, 40.0);
        set(&mut frame, 13, 6, 40.0);
        set(&mut frame, 12, 20, 40.0);
        let hot = roi_min_max(&frame, GEO, roi).unwrap();
        assert_eq!(hot.max_pos, Some(PixelPos::new(16, 5)));
    }

    #[test]
    fn uniform_frame_reports_roi_origin() {
        let roi = Roi::new(4, 3, 5, 5);
        let hot = roi_min_max(&flat_frame(25.0), GEO, roi).unwrap();
        assert_eq!(hot.max_pos, Some(PixelPos::new(4, 3)));
        assert_eq!(hot.max_pos_roi, Some(PixelPos::new(0, 0)));
    }

    #[test]
    fn maximum_matches_scanned_value_for_every_roi() {
        // Deterministic pseudo-random frame with repeated values.
        let frame: Vec<f32> = (0..GEO.pixel_count())
            .map(|i| f32::from(u8::try_from((i * 37 + 11) % 29).unwrap()))
            .collect();
        for (w, h) in [(1, 1), (3, 2), (7, 20), (10, 10), (32, 24), (31, 1)] {
            let roi = center_roi(GEO, w, h);
            let hot = roi_min_max(&frame, GEO, roi).unwrap();
            let pos = hot.max_pos.unwrap();
            let at_pos = frame[GEO.index(pos.x, pos.y).unwrap()];
            assert_eq!(widen(at_pos), hot.max_c);

            let mut first = None;
            for y in roi.y0..roi.y0 + roi.h {
                for x in roi.x0..roi.x0 + roi.w {
                    let v = frame[GEO.index(x, y).unwrap()];
                    if widen(v) == hot.max_c && first.is_none() {
                        first = Some(PixelPos::new(x, y));
                    }
                    assert!(widen(v) <= hot.max_c);
                }
            }
            assert_eq!(first, Some(pos), "roi {w}x{h}");
        }
    }

    #[test]
    fn reported_temperatures_keep_sensor_decimals() {
        let roi = center_roi(GEO, 7, 20);
        let mut frame = flat_frame(24.1);
        set(&mut frame, 14, 9, 41.7);
        let hot = roi_min_max(&frame, GEO, roi).unwrap();
        assert_eq!(hot.max_c, 41.7);
        assert_eq!(hot.min_c, Some(24.1));
        assert_eq!(serde_json::to_string(&hot.max_c).unwrap(), "41.7");
    }

    #[test]
    fn non_finite_pixels_are_skipped() {
        let roi = Roi::new(0, 0, 2, 1);
        let mut frame = flat_frame(f32::NAN);
        set(&mut frame, 1, 0, 30.0);
        let hot = roi_min_max(&frame, GEO, roi).unwrap();
        assert_eq!(hot.max_pos, Some(PixelPos::new(1, 0)));

        let all_nan = flat_frame(f32::NAN);
        assert!(roi_min_max(&all_nan, GEO, roi).is_none());
    }
}
