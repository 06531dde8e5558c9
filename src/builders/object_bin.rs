use super::{PARALLEL_FIND_BLOCK_SIZE, PARALLEL_PARTITION_BLOCK_SIZE, PARALLEL_THRESHOLD};
use crate::aabb::Aabb;
use crate::lbounds::LinearBounds;
use crate::prim_ref::{PrimInfo, PrimRef, PrimSet};
use crate::utils::{blocks, parallel_partition_fold, parallel_reduce};
use glam::*;

/// Affine map from centroid coordinates to bin indices, captured from the
/// centroid bounds at find time so the partition later replays the exact
/// same assignment.
#[derive(Debug, Copy, Clone)]
pub struct BinMapping {
    scale: Vec3A,
    offset: Vec3A,
    bin_count: usize,
}

impl BinMapping {
    pub fn new(cent_bounds: &Aabb, bin_count: usize) -> BinMapping {
        let diagonal: Vec3A = cent_bounds.diagonal();
        // A degenerate axis maps every centroid to bin 0, which the SAH
        // sweep then rejects as unsplittable.
        let scale = Vec3A::select(
            diagonal.cmpgt(Vec3A::ZERO),
            Vec3A::splat(bin_count as f32) / diagonal,
            Vec3A::ZERO,
        );
        let offset = -Vec3A::from(cent_bounds.min) * scale;
        BinMapping {
            scale,
            offset,
            bin_count,
        }
    }

    #[inline]
    pub fn bin(&self, center: Vec3A, axis: usize) -> usize {
        let index = center[axis] * self.scale[axis] + self.offset[axis];
        (self.bin_count - 1).min(index.max(0.0) as usize)
    }

    #[inline]
    pub fn bin_count(&self) -> usize {
        self.bin_count
    }
}

/// Best object split of a set: a bin boundary on one axis.
#[derive(Debug, Copy, Clone)]
pub struct ObjectSplit {
    pub axis: usize,
    pub pos: usize,
    pub cost: f32,
    pub mapping: BinMapping,
}

#[derive(Debug, Copy, Clone)]
struct ObjectBin {
    lbounds: LinearBounds,
    count: usize,
}

impl ObjectBin {
    fn empty() -> ObjectBin {
        ObjectBin {
            lbounds: LinearBounds::empty(),
            count: 0,
        }
    }
}

/// Per-axis centroid bins over a primitive range.
#[derive(Debug, Clone)]
pub(crate) struct ObjectBins {
    bins: [Vec<ObjectBin>; 3],
}

impl ObjectBins {
    fn new(bin_count: usize) -> ObjectBins {
        let axis = vec![ObjectBin::empty(); bin_count];
        ObjectBins {
            bins: [axis.clone(), axis.clone(), axis],
        }
    }

    fn bin_range(&mut self, prims: &[PrimRef], mapping: &BinMapping) {
        for prim in prims {
            let center = prim.center();
            for axis in 0..3 {
                let bin = &mut self.bins[axis][mapping.bin(center, axis)];
                bin.count += 1;
                bin.lbounds.extend(&prim.lbounds);
            }
        }
    }

    fn merge(mut self, other: ObjectBins) -> ObjectBins {
        for axis in 0..3 {
            for (bin, other_bin) in self.bins[axis].iter_mut().zip(other.bins[axis].iter()) {
                bin.count += other_bin.count;
                bin.lbounds.extend(&other_bin.lbounds);
            }
        }
        self
    }

    pub(crate) fn bin_parallel(set: &PrimSet, mapping: &BinMapping) -> ObjectBins {
        let prims = &set.prims;
        parallel_reduce(
            set.begin..set.end,
            PARALLEL_FIND_BLOCK_SIZE,
            PARALLEL_THRESHOLD,
            ObjectBins::new(mapping.bin_count()),
            |range| {
                let mut bins = ObjectBins::new(mapping.bin_count());
                bins.bin_range(prims.slice(range.start, range.end), mapping);
                bins
            },
            ObjectBins::merge,
        )
    }

    /// SAH sweep over every axis and split position. `time_scale` brings
    /// the cost into the same space as temporal split costs.
    pub(crate) fn best(
        &self,
        mapping: &BinMapping,
        log_block_size: usize,
        time_scale: f32,
    ) -> Option<ObjectSplit> {
        let bin_count = mapping.bin_count();
        let mut best: Option<ObjectSplit> = None;
        let mut right_cost = vec![0.0_f32; bin_count];
        let mut right_count = vec![0_usize; bin_count];

        for axis in 0..3 {
            let bins = &self.bins[axis];

            let mut accum = LinearBounds::empty();
            let mut count = 0;
            for pos in (1..bin_count).rev() {
                accum.extend(&bins[pos].lbounds);
                count += bins[pos].count;
                right_cost[pos] =
                    accum.expected_half_area() * blocks(count, log_block_size) as f32;
                right_count[pos] = count;
            }

            let mut accum = LinearBounds::empty();
            let mut count = 0;
            for pos in 1..bin_count {
                accum.extend(&bins[pos - 1].lbounds);
                count += bins[pos - 1].count;
                if count == 0 || right_count[pos] == 0 {
                    continue;
                }
                let cost = accum.expected_half_area() * blocks(count, log_block_size) as f32
                    + right_cost[pos];
                if best.map_or(true, |split| cost < split.cost) {
                    best = Some(ObjectSplit {
                        axis,
                        pos,
                        cost,
                        mapping: *mapping,
                    });
                }
            }
        }

        best.map(|mut split| {
            split.cost *= time_scale;
            split
        })
    }
}

/// In-place partition of the set's range at the split's bin boundary.
/// Child summaries are accumulated during the partition; both children
/// keep the parent's time range.
pub(crate) fn partition_object(
    set: &PrimSet,
    split: &ObjectSplit,
) -> (PrimInfo, PrimSet, PrimInfo, PrimSet) {
    let mapping = split.mapping;
    let axis = split.axis;
    let pos = split.pos;

    let (pivot, linfo, rinfo) = parallel_partition_fold(
        set.range_mut(),
        PARALLEL_PARTITION_BLOCK_SIZE,
        PARALLEL_THRESHOLD,
        PrimInfo::empty(set.time_span),
        &|prim: &PrimRef| mapping.bin(prim.center(), axis) < pos,
        &|info: &mut PrimInfo, prim: &PrimRef| info.add(prim),
        &|info: &mut PrimInfo, other: &PrimInfo| info.merge(other),
    );

    let mid = set.begin + pivot;
    let lset = PrimSet::new(set.prims.clone(), set.begin, mid, set.time_span);
    let rset = PrimSet::new(set.prims.clone(), mid, set.end, set.time_span);
    (linfo, lset, rinfo, rset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lbounds::TimeSpan;

    fn unit_ref(prim_id: u32, at: [f32; 3]) -> PrimRef {
        let min = [at[0] - 0.5, at[1] - 0.5, at[2] - 0.5];
        let max = [at[0] + 0.5, at[1] + 0.5, at[2] + 0.5];
        PrimRef::new(
            0,
            prim_id,
            LinearBounds::from_static(Aabb::from_points(min, max)),
            1,
        )
    }

    fn set_of(positions: &[[f32; 3]]) -> (PrimSet, PrimInfo) {
        let prims: Vec<PrimRef> = positions
            .iter()
            .enumerate()
            .map(|(i, &p)| unit_ref(i as u32, p))
            .collect();
        let mut info = PrimInfo::empty(TimeSpan::UNIT);
        prims.iter().for_each(|p| info.add(p));
        (PrimSet::from_vec(prims, TimeSpan::UNIT), info)
    }

    #[test]
    fn mapping_clamps_to_bin_range() {
        let bounds = Aabb::from_points([0.0; 3], [1.0, 1.0, 1.0]);
        let mapping = BinMapping::new(&bounds, 16);
        assert_eq!(mapping.bin(Vec3A::new(0.0, 0.0, 0.0), 0), 0);
        assert_eq!(mapping.bin(Vec3A::new(1.0, 0.0, 0.0), 0), 15);
        assert_eq!(mapping.bin(Vec3A::new(2.0, 0.0, 0.0), 0), 15);
        assert_eq!(mapping.bin(Vec3A::new(-1.0, 0.0, 0.0), 0), 0);
    }

    #[test]
    fn degenerate_axis_maps_to_bin_zero() {
        let bounds = Aabb::from_points([0.0; 3], [0.0, 1.0, 1.0]);
        let mapping = BinMapping::new(&bounds, 16);
        assert_eq!(mapping.bin(Vec3A::new(0.0, 0.0, 0.0), 0), 0);
        assert_eq!(mapping.bin(Vec3A::new(5.0, 0.0, 0.0), 0), 0);
    }

    #[test]
    fn best_split_separates_two_clusters() {
        let (set, info) = set_of(&[
            [0.0, 0.0, 0.0],
            [0.2, 0.0, 0.0],
            [10.0, 0.0, 0.0],
            [10.2, 0.0, 0.0],
        ]);
        let mapping = BinMapping::new(&info.cent_bounds, 16);
        let bins = ObjectBins::bin_parallel(&set, &mapping);
        let split = bins.best(&mapping, 0, 1.0).expect("split must exist");
        assert_eq!(split.axis, 0);

        let (linfo, lset, rinfo, rset) = partition_object(&set, &split);
        assert_eq!(linfo.num, 2);
        assert_eq!(rinfo.num, 2);
        assert_eq!(lset.len(), 2);
        assert_eq!(rset.len(), 2);
        assert!(lset.slice().iter().all(|p| p.center().x < 5.0));
        assert!(rset.slice().iter().all(|p| p.center().x > 5.0));
    }

    #[test]
    fn coincident_centroids_have_no_split() {
        let (set, info) = set_of(&[[1.0; 3]; 8]);
        let mapping = BinMapping::new(&info.cent_bounds, 16);
        let bins = ObjectBins::bin_parallel(&set, &mapping);
        assert!(bins.best(&mapping, 0, 1.0).is_none());
    }

    #[test]
    fn partition_infos_match_set_contents() {
        let (set, info) = set_of(&[
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [2.0, 0.0, 0.0],
            [3.0, 0.0, 0.0],
            [4.0, 0.0, 0.0],
        ]);
        let mapping = BinMapping::new(&info.cent_bounds, 16);
        let bins = ObjectBins::bin_parallel(&set, &mapping);
        let split = bins.best(&mapping, 0, 1.0).unwrap();
        let (linfo, lset, rinfo, rset) = partition_object(&set, &split);

        assert_eq!(linfo.num + rinfo.num, 5);
        assert_eq!(linfo.num, lset.len());
        assert_eq!(rinfo.num, rset.len());

        let mut check = PrimInfo::empty(TimeSpan::UNIT);
        lset.slice().iter().for_each(|p| check.add(p));
        assert_eq!(check.cent_bounds, linfo.cent_bounds);
        assert_eq!(check.geom_bounds, linfo.geom_bounds);
    }
}
