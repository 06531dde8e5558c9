use crate::lbounds::{LinearBounds, TimeSpan};

/// Capabilities the builder needs from the primitive store.
///
/// Geometries are addressed by opaque (geometry id, primitive id) pairs.
/// A geometry stores its motion as a piecewise-linear sequence of boxes
/// over the [0, 1] shutter window; `linear_bounds` re-derives a linear
/// bound over any sub-interval of that window.
pub trait MotionGeometry: Send + Sync {
    /// Number of motion segments geometry `geom_id` spans over [0, 1].
    fn num_time_segments(&self, geom_id: u32) -> u32;

    /// Linear bounds of one primitive over `span`. The returned pair must
    /// bound the primitive at every time in `span` under interpolation.
    fn linear_bounds(&self, geom_id: u32, prim_id: u32, span: TimeSpan) -> LinearBounds;

    /// Number of motion segments of `geom_id` that overlap `span`.
    fn overlapping_segments(&self, geom_id: u32, span: TimeSpan) -> u32 {
        let total = self.num_time_segments(geom_id) as f32;
        let lower = (1.0001 * span.lower * total).floor() as u32;
        let upper = (0.9999 * span.upper * total).ceil() as u32;
        upper.saturating_sub(lower).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aabb::Aabb;

    struct FourSegments;

    impl MotionGeometry for FourSegments {
        fn num_time_segments(&self, _geom_id: u32) -> u32 {
            4
        }

        fn linear_bounds(&self, _geom_id: u32, _prim_id: u32, _span: TimeSpan) -> LinearBounds {
            LinearBounds::from_static(Aabb::from_points([0.0; 3], [1.0; 3]))
        }
    }

    #[test]
    fn overlapping_segments_counts_whole_window() {
        let scene = FourSegments;
        assert_eq!(scene.overlapping_segments(0, TimeSpan::UNIT), 4);
    }

    #[test]
    fn overlapping_segments_respects_boundaries() {
        let scene = FourSegments;
        // [0, 0.5] covers segments 0 and 1 only.
        assert_eq!(scene.overlapping_segments(0, TimeSpan::new(0.0, 0.5)), 2);
        // [0.25, 0.5] is exactly one segment.
        assert_eq!(scene.overlapping_segments(0, TimeSpan::new(0.25, 0.5)), 1);
        // An unaligned span overlaps both neighbouring segments.
        assert_eq!(scene.overlapping_segments(0, TimeSpan::new(0.2, 0.3)), 2);
    }
}
