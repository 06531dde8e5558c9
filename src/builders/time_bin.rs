use super::{
    PARALLEL_FIND_BLOCK_SIZE, PARALLEL_PARTITION_BLOCK_SIZE, PARALLEL_THRESHOLD,
    TEMPORAL_SPLIT_PENALTY,
};
use crate::lbounds::{LinearBounds, TimeSpan};
use crate::prim_ref::{PrimInfo, PrimRef, PrimSet};
use crate::scene::MotionGeometry;
use crate::utils::{blocks, parallel_reduce};

/// Best temporal split of a set: a time snapped to a motion-segment
/// boundary.
#[derive(Debug, Copy, Clone)]
pub struct TemporalSplit {
    pub time: f32,
    pub cost: f32,
}

/// Candidate split times for a window spanning `segments` motion
/// segments: evenly spaced positions snapped to segment boundaries.
/// Candidates that snap onto the window edges are dropped.
fn candidate_times(span: TimeSpan, segments: u32, locations: usize) -> Vec<Option<f32>> {
    (0..locations)
        .map(|b| {
            let t = (b + 1) as f32 / (locations + 1) as f32;
            let center = (span.lerp(t) * segments as f32).round() / segments as f32;
            span.contains_inner(center).then_some(center)
        })
        .collect()
}

/// Per-candidate accumulation of counts and linear bounds on both sides
/// of the candidate time.
struct TemporalBins {
    count0: Vec<usize>,
    count1: Vec<usize>,
    bounds0: Vec<LinearBounds>,
    bounds1: Vec<LinearBounds>,
}

impl TemporalBins {
    fn new(locations: usize) -> TemporalBins {
        TemporalBins {
            count0: vec![0; locations],
            count1: vec![0; locations],
            bounds0: vec![LinearBounds::empty(); locations],
            bounds1: vec![LinearBounds::empty(); locations],
        }
    }

    fn bin_range<S: MotionGeometry + ?Sized>(
        &mut self,
        scene: &S,
        prims: &[PrimRef],
        span: TimeSpan,
        candidates: &[Option<f32>],
    ) {
        for (b, candidate) in candidates.iter().enumerate() {
            let center = match candidate {
                Some(center) => *center,
                None => continue,
            };
            let dt0 = TimeSpan::new(span.lower, center);
            let dt1 = TimeSpan::new(center, span.upper);

            for prim in prims {
                self.bounds0[b].extend(&scene.linear_bounds(prim.geom_id, prim.prim_id, dt0));
                self.bounds1[b].extend(&scene.linear_bounds(prim.geom_id, prim.prim_id, dt1));
                self.count0[b] += scene.overlapping_segments(prim.geom_id, dt0) as usize;
                self.count1[b] += scene.overlapping_segments(prim.geom_id, dt1) as usize;
            }
        }
    }

    fn merge(mut self, other: TemporalBins) -> TemporalBins {
        for b in 0..self.count0.len() {
            self.count0[b] += other.count0[b];
            self.count1[b] += other.count1[b];
            self.bounds0[b].extend(&other.bounds0[b]);
            self.bounds1[b].extend(&other.bounds1[b]);
        }
        self
    }

    fn best(
        &self,
        span: TimeSpan,
        candidates: &[Option<f32>],
        log_block_size: usize,
    ) -> Option<TemporalSplit> {
        let mut best: Option<TemporalSplit> = None;
        for (b, candidate) in candidates.iter().enumerate() {
            let center = match candidate {
                Some(center) => *center,
                None => continue,
            };
            let dt0 = TimeSpan::new(span.lower, center);
            let dt1 = TimeSpan::new(center, span.upper);

            let lcount = blocks(self.count0[b], log_block_size) as f32;
            let rcount = blocks(self.count1[b], log_block_size) as f32;
            let sah0 = self.bounds0[b].expected_half_area() * lcount * dt0.size();
            let sah1 = self.bounds1[b].expected_half_area() * rcount * dt1.size();
            let cost = sah0 + sah1;

            if best.map_or(true, |split| cost < split.cost) {
                best = Some(TemporalSplit { time: center, cost });
            }
        }

        best.map(|mut split| {
            split.cost *= TEMPORAL_SPLIT_PENALTY;
            split
        })
    }
}

/// Evaluates the temporal split candidates of a set, returning the best
/// one or `None` when every candidate snaps out of the window.
pub(crate) fn find_temporal_split<S: MotionGeometry>(
    scene: &S,
    set: &PrimSet,
    info: &PrimInfo,
    log_block_size: usize,
    locations: usize,
) -> Option<TemporalSplit> {
    debug_assert!(!set.is_empty());
    let candidates = candidate_times(set.time_span, info.max_time_segments, locations);
    if candidates.iter().all(Option::is_none) {
        return None;
    }

    let prims = &set.prims;
    let span = set.time_span;
    let bins = parallel_reduce(
        set.begin..set.end,
        PARALLEL_FIND_BLOCK_SIZE,
        PARALLEL_THRESHOLD,
        TemporalBins::new(locations),
        |range| {
            let mut bins = TemporalBins::new(locations);
            bins.bin_range(scene, prims.slice(range.start, range.end), span, &candidates);
            bins
        },
        TemporalBins::merge,
    );
    bins.best(span, &candidates, log_block_size)
}

/// Re-derives one side of a temporal split in place: every reference in
/// the parent's range is replaced by its bounds over the side's
/// sub-interval. Both sides of the split alias the parent's range, so at
/// most one side's state is live in the array at a time.
pub(crate) fn apply_temporal_split<S: MotionGeometry>(
    scene: &S,
    set: &PrimSet,
    time: f32,
    right: bool,
) -> (PrimInfo, PrimSet) {
    debug_assert!(set.time_span.contains_inner(time));
    let span = if right {
        TimeSpan::new(time, set.time_span.upper)
    } else {
        TimeSpan::new(set.time_span.lower, time)
    };

    let prims = &set.prims;
    let info = parallel_reduce(
        set.begin..set.end,
        PARALLEL_PARTITION_BLOCK_SIZE,
        PARALLEL_THRESHOLD,
        PrimInfo::empty(span),
        |range| {
            let mut info = PrimInfo::empty(span);
            for i in range {
                let old = *prims.get(i);
                let prim = PrimRef::from_scene(scene, old.geom_id, old.prim_id, span);
                prims.set(i, prim);
                info.add(&prim);
            }
            info
        },
        |mut a, b| {
            a.merge(&b);
            a
        },
    );

    let side = PrimSet::new(set.prims.clone(), set.begin, set.end, span);
    (info, side)
}
