use crate::prim_ref::{PrimInfo, PrimSet};
use thiserror::Error;

mod child_list;
mod motion_sah;
mod object_bin;
mod time_bin;

pub use motion_sah::{BuildOps, MotionSahBuilder};
pub use object_bin::{BinMapping, ObjectSplit};
pub use time_bin::TemporalSplit;

/// Maximal supported tree fan-out.
pub const MAX_BRANCHING_FACTOR: usize = 8;
/// Levels of safety margin before the depth limit; sets below this line
/// are finished with balanced median splits.
pub(crate) const MIN_LARGE_LEAF_LEVELS: usize = 8;
/// Sub-trees at or below this size recurse on the calling thread.
pub(crate) const SINGLE_THREADED_THRESHOLD: usize = 1024;
/// Set size above which binning and partitioning run as parallel
/// reductions.
pub(crate) const PARALLEL_THRESHOLD: usize = 3 * 1024;
pub(crate) const PARALLEL_FIND_BLOCK_SIZE: usize = 1024;
pub(crate) const PARALLEL_PARTITION_BLOCK_SIZE: usize = 128;
/// Cost bar a temporal split must clear before it is preferred; temporal
/// splits duplicate primitives across the produced sub-trees.
pub(crate) const TEMPORAL_SPLIT_PENALTY: f32 = 1.10;
/// A node may split temporally only when its time window spans at least
/// this many motion segments. Kept just under 2 so windows covering two
/// whole segments still qualify.
pub(crate) const TEMPORAL_GATE_SEGMENTS: f32 = 1.99;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("branching factor {0} out of range 2..=8")]
    BranchingFactor(usize),
    #[error("log block size {0} out of range 0..=4")]
    LogBlockSize(usize),
    #[error("min leaf size {0} exceeds max leaf size {1}")]
    LeafSizeRange(usize, usize),
    #[error("traversal and intersection costs must be positive")]
    NonPositiveCost,
    #[error("depth limit {0} reached")]
    DepthLimit(usize),
}

/// The partition chosen for a node.
#[derive(Debug, Copy, Clone)]
pub enum Split {
    /// Spatial partition at a binned centroid position.
    Object(ObjectSplit),
    /// Partition of the time interval at a motion-segment boundary.
    Temporal(TemporalSplit),
    /// No useful binned split exists; sort and split at the median.
    Fallback,
    /// Not evaluated yet.
    Invalid,
}

impl Split {
    #[inline]
    pub fn cost(&self) -> f32 {
        match self {
            Split::Object(split) => split.cost,
            Split::Temporal(split) => split.cost,
            Split::Fallback | Split::Invalid => f32::INFINITY,
        }
    }

    #[inline]
    pub fn is_temporal(&self) -> bool {
        matches!(self, Split::Temporal(_))
    }
}

/// The unit of recursion: a set, its summary, the split chosen for it and
/// the node depth it sits at.
#[derive(Debug, Clone)]
pub struct BuildRecord {
    pub prims: PrimSet,
    pub info: PrimInfo,
    pub split: Split,
    pub depth: usize,
}

impl BuildRecord {
    pub fn new(prims: PrimSet, info: PrimInfo, depth: usize) -> BuildRecord {
        BuildRecord {
            prims,
            info,
            split: Split::Invalid,
            depth,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.info.num
    }
}

/// Re-establishes a total order after destructive partitions.
pub(crate) fn deterministic_order(set: &PrimSet) {
    set.range_mut().sort_unstable_by_key(|prim| prim.sort_key());
}

/// Median split; both children take the parent's time range.
pub(crate) fn partition_fallback(set: &PrimSet) -> (PrimInfo, PrimSet, PrimInfo, PrimSet) {
    let mid = (set.begin + set.end) / 2;

    let mut linfo = PrimInfo::empty(set.time_span);
    for prim in set.prims.slice(set.begin, mid) {
        linfo.add(prim);
    }
    let mut rinfo = PrimInfo::empty(set.time_span);
    for prim in set.prims.slice(mid, set.end) {
        rinfo.add(prim);
    }

    let lset = PrimSet::new(set.prims.clone(), set.begin, mid, set.time_span);
    let rset = PrimSet::new(set.prims.clone(), mid, set.end, set.time_span);
    (linfo, lset, rinfo, rset)
}
