use crate::aabb::Aabb;
use crate::lbounds::{LinearBounds, TimeSpan};
use crate::scene::MotionGeometry;
use crate::utils::{blocks, SharedVec};
use glam::Vec3A;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One primitive occurrence inside the current time window.
///
/// Created when per-primitive bounds are derived over a time interval,
/// replaced in place when a temporal split narrows that interval, and
/// moved within its array by object partitioning.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimRef {
    pub geom_id: u32,
    pub prim_id: u32,
    pub lbounds: LinearBounds,
    pub num_segments: u32,
}

impl PrimRef {
    pub fn new(geom_id: u32, prim_id: u32, lbounds: LinearBounds, num_segments: u32) -> PrimRef {
        debug_assert!(num_segments >= 1);
        PrimRef {
            geom_id,
            prim_id,
            lbounds,
            num_segments,
        }
    }

    /// Derives the reference for one primitive over `span`.
    pub fn from_scene<S: MotionGeometry + ?Sized>(
        scene: &S,
        geom_id: u32,
        prim_id: u32,
        span: TimeSpan,
    ) -> PrimRef {
        let lbounds = scene.linear_bounds(geom_id, prim_id, span);
        let num_segments = scene.overlapping_segments(geom_id, span);
        PrimRef::new(geom_id, prim_id, lbounds, num_segments)
    }

    /// Centroid used for object binning: the center of the box at the
    /// middle of the reference's time window.
    #[inline]
    pub fn center(&self) -> Vec3A {
        self.lbounds.interpolate(0.5).center()
    }

    /// Total order used to restore determinism after destructive
    /// partitions.
    #[inline]
    pub(crate) fn sort_key(&self) -> (u32, u32) {
        (self.geom_id, self.prim_id)
    }
}

/// Aggregates of a primitive set.
#[derive(Debug, Copy, Clone)]
pub struct PrimInfo {
    pub num: usize,
    pub geom_bounds: LinearBounds,
    pub cent_bounds: Aabb,
    pub time_span: TimeSpan,
    pub max_time_segments: u32,
}

impl PrimInfo {
    pub fn empty(time_span: TimeSpan) -> PrimInfo {
        PrimInfo {
            num: 0,
            geom_bounds: LinearBounds::empty(),
            cent_bounds: Aabb::empty(),
            time_span,
            max_time_segments: 0,
        }
    }

    #[inline]
    pub fn add(&mut self, prim: &PrimRef) {
        self.num += 1;
        self.geom_bounds.extend(&prim.lbounds);
        self.cent_bounds.grow(prim.center());
        self.max_time_segments = self.max_time_segments.max(prim.num_segments);
    }

    #[inline]
    pub fn merge(&mut self, other: &PrimInfo) {
        self.num += other.num;
        self.geom_bounds.extend(&other.geom_bounds);
        self.cent_bounds.grow_bb(&other.cent_bounds);
        self.max_time_segments = self.max_time_segments.max(other.max_time_segments);
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.num
    }

    #[inline]
    pub fn expected_half_area(&self) -> f32 {
        self.geom_bounds.expected_half_area()
    }

    /// SAH cost of turning the whole set into one leaf, in the same cost
    /// space as the split costs (time-interval weighted, block
    /// quantised).
    #[inline]
    pub fn leaf_sah(&self, log_block_size: usize) -> f32 {
        self.expected_half_area() * blocks(self.num, log_block_size) as f32 * self.time_span.size()
    }
}

/// A shared primitive array plus the index range and time interval this
/// set covers. Sets produced by an object split alias their parent's
/// array over disjoint ranges; sets produced by a temporal split alias
/// the parent's range itself, re-derived for a narrowed interval.
#[derive(Debug, Clone)]
pub struct PrimSet {
    pub prims: Arc<SharedVec<PrimRef>>,
    pub begin: usize,
    pub end: usize,
    pub time_span: TimeSpan,
}

impl PrimSet {
    pub fn new(prims: Arc<SharedVec<PrimRef>>, begin: usize, end: usize, time_span: TimeSpan) -> Self {
        debug_assert!(begin <= end && end <= prims.len());
        PrimSet {
            prims,
            begin,
            end,
            time_span,
        }
    }

    pub fn from_vec(prims: Vec<PrimRef>, time_span: TimeSpan) -> Self {
        let len = prims.len();
        PrimSet::new(Arc::new(SharedVec::from_vec(prims)), 0, len, time_span)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    #[inline]
    pub fn slice(&self) -> &[PrimRef] {
        self.prims.slice(self.begin, self.end)
    }

    #[inline]
    pub(crate) fn range_mut(&self) -> &mut [PrimRef] {
        self.prims.range(self.begin, self.end)
    }
}

/// Derives the root reference array and its summary for `ids` over
/// `span`.
pub fn build_prim_refs<S: MotionGeometry>(
    scene: &S,
    ids: &[(u32, u32)],
    span: TimeSpan,
) -> (Vec<PrimRef>, PrimInfo) {
    let prims: Vec<PrimRef> = ids
        .par_iter()
        .map(|&(geom_id, prim_id)| PrimRef::from_scene(scene, geom_id, prim_id, span))
        .collect();

    let mut info = PrimInfo::empty(span);
    for prim in &prims {
        info.add(prim);
    }
    (prims, info)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_ref(geom_id: u32, prim_id: u32, at: [f32; 3]) -> PrimRef {
        let min = [at[0] - 0.5, at[1] - 0.5, at[2] - 0.5];
        let max = [at[0] + 0.5, at[1] + 0.5, at[2] + 0.5];
        PrimRef::new(
            geom_id,
            prim_id,
            LinearBounds::from_static(Aabb::from_points(min, max)),
            1,
        )
    }

    #[test]
    fn center_is_time_averaged() {
        let prim = PrimRef::new(
            0,
            0,
            LinearBounds::new(
                Aabb::from_points([0.0; 3], [1.0; 3]),
                Aabb::from_points([2.0, 0.0, 0.0], [3.0, 1.0, 1.0]),
            ),
            2,
        );
        assert_eq!(prim.center(), Vec3A::new(1.5, 0.5, 0.5));
    }

    #[test]
    fn info_tracks_counts_and_bounds() {
        let mut info = PrimInfo::empty(TimeSpan::UNIT);
        info.add(&unit_ref(0, 0, [0.0; 3]));
        info.add(&unit_ref(0, 1, [2.0, 0.0, 0.0]));

        assert_eq!(info.size(), 2);
        assert_eq!(info.max_time_segments, 1);
        assert_eq!(info.cent_bounds.min, [0.0, 0.0, 0.0]);
        assert_eq!(info.cent_bounds.max, [2.0, 0.0, 0.0]);
        assert_eq!(info.geom_bounds.begin.min, [-0.5; 3]);
        assert_eq!(info.geom_bounds.begin.max, [2.5, 0.5, 0.5]);
    }

    #[test]
    fn merge_equals_sequential_adds() {
        let prims: Vec<PrimRef> = (0..6)
            .map(|i| unit_ref(0, i, [i as f32, 0.0, (i % 2) as f32]))
            .collect();

        let mut whole = PrimInfo::empty(TimeSpan::UNIT);
        prims.iter().for_each(|p| whole.add(p));

        let mut first = PrimInfo::empty(TimeSpan::UNIT);
        let mut second = PrimInfo::empty(TimeSpan::UNIT);
        prims[..3].iter().for_each(|p| first.add(p));
        prims[3..].iter().for_each(|p| second.add(p));
        first.merge(&second);

        assert_eq!(first.num, whole.num);
        assert_eq!(first.cent_bounds, whole.cent_bounds);
        assert_eq!(first.geom_bounds, whole.geom_bounds);
    }

    #[test]
    fn leaf_sah_scales_with_time() {
        let mut info = PrimInfo::empty(TimeSpan::new(0.0, 0.5));
        info.add(&unit_ref(0, 0, [0.0; 3]));
        // half-area 3 * one block * half the shutter
        assert_eq!(info.leaf_sah(0), 1.5);
    }
}
