use super::child_list::LocalChildren;
use super::object_bin::{partition_object, BinMapping, ObjectBins, ObjectSplit};
use super::time_bin::find_temporal_split;
use super::{
    deterministic_order, partition_fallback, BuildError, BuildRecord, Split,
    MAX_BRANCHING_FACTOR, MIN_LARGE_LEAF_LEVELS, SINGLE_THREADED_THRESHOLD,
    TEMPORAL_GATE_SEGMENTS,
};
use crate::prim_ref::{PrimInfo, PrimRef, PrimSet};
use crate::scene::MotionGeometry;
use rayon::prelude::*;
use tracing::{debug, trace};

/// The collaborators a build drives. The builder calls through these
/// without knowing their representation; `create_alloc` produces a
/// per-worker allocation handle that `create_node` and `create_leaf`
/// receive.
pub struct BuildOps<CA, CN, UN, CL, PM> {
    pub create_alloc: CA,
    pub create_node: CN,
    pub update_node: UN,
    pub create_leaf: CL,
    pub progress: PM,
}

/// Top-down motion-blur BVH builder combining object binning and
/// temporal splitting under one SAH cost model.
#[derive(Debug)]
pub struct MotionSahBuilder<'a, S: MotionGeometry> {
    scene: &'a S,
    branching_factor: usize,
    max_depth: usize,
    log_block_size: usize,
    min_leaf_size: usize,
    max_leaf_size: usize,
    traversal_cost: f32,
    intersection_cost: f32,
    bin_count: usize,
    temporal_split_candidates: usize,
    single_thread_threshold: usize,
}

impl<'a, S: MotionGeometry> MotionSahBuilder<'a, S> {
    pub fn new(scene: &'a S, branching_factor: usize) -> Result<Self, BuildError> {
        if !(2..=MAX_BRANCHING_FACTOR).contains(&branching_factor) {
            return Err(BuildError::BranchingFactor(branching_factor));
        }
        Ok(Self {
            scene,
            branching_factor,
            max_depth: 64,
            log_block_size: 0,
            min_leaf_size: 1,
            max_leaf_size: 8,
            traversal_cost: 1.0,
            intersection_cost: 1.0,
            bin_count: 16,
            temporal_split_candidates: 1,
            single_thread_threshold: SINGLE_THREADED_THRESHOLD,
        })
    }

    /// Maximum depth of the tree.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Leaf costs are quantised to blocks of `2^log_block_size`
    /// primitives.
    pub fn with_log_block_size(mut self, log_block_size: usize) -> Self {
        self.log_block_size = log_block_size;
        self
    }

    /// Range of primitives per leaf.
    pub fn with_leaf_size(mut self, min: usize, max: usize) -> Self {
        self.min_leaf_size = min;
        self.max_leaf_size = max;
        self
    }

    /// SAH cost of traversing a node.
    pub fn with_traversal_cost(mut self, traversal_cost: f32) -> Self {
        self.traversal_cost = traversal_cost;
        self
    }

    /// SAH cost of intersecting a primitive.
    pub fn with_intersection_cost(mut self, intersection_cost: f32) -> Self {
        self.intersection_cost = intersection_cost;
        self
    }

    /// Number of centroid bins per axis.
    pub fn with_bin_count(mut self, bin_count: usize) -> Self {
        self.bin_count = bin_count;
        self
    }

    /// Number of temporal split candidates evaluated per node.
    pub fn with_temporal_split_candidates(mut self, candidates: usize) -> Self {
        self.temporal_split_candidates = candidates;
        self
    }

    /// Sub-trees at or below this size build on the calling thread.
    pub fn with_single_thread_threshold(mut self, threshold: usize) -> Self {
        self.single_thread_threshold = threshold;
        self
    }

    pub(crate) fn scene(&self) -> &'a S {
        self.scene
    }

    fn validate(&self) -> Result<(), BuildError> {
        if self.log_block_size > 4 {
            return Err(BuildError::LogBlockSize(self.log_block_size));
        }
        if self.min_leaf_size > self.max_leaf_size {
            return Err(BuildError::LeafSizeRange(
                self.min_leaf_size,
                self.max_leaf_size,
            ));
        }
        if self.traversal_cost <= 0.0 || self.intersection_cost <= 0.0 {
            return Err(BuildError::NonPositiveCost);
        }
        Ok(())
    }

    /// Chooses the cheaper of the best object split and, when the node's
    /// time window spans enough motion segments, the best temporal split.
    pub(crate) fn find(&self, record: &BuildRecord) -> Split {
        let object = self.find_object_split(record);
        let object_cost = object.map_or(f32::INFINITY, |split| split.cost);

        let segments = record.info.max_time_segments;
        let spanned = record.prims.time_span.size() * segments as f32;
        if spanned > TEMPORAL_GATE_SEGMENTS {
            if let Some(temporal) = find_temporal_split(
                self.scene,
                &record.prims,
                &record.info,
                self.log_block_size,
                self.temporal_split_candidates,
            ) {
                if temporal.cost < object_cost {
                    return Split::Temporal(temporal);
                }
            }
        }

        match object {
            Some(split) => Split::Object(split),
            None => Split::Fallback,
        }
    }

    fn find_object_split(&self, record: &BuildRecord) -> Option<ObjectSplit> {
        if record.prims.is_empty() {
            return None;
        }
        let mapping = BinMapping::new(&record.info.cent_bounds, self.bin_count);
        let bins = ObjectBins::bin_parallel(&record.prims, &mapping);
        bins.best(
            &mapping,
            self.log_block_size,
            record.prims.time_span.size(),
        )
    }

    /// Partitions a record's range according to its split. Temporal
    /// splits are applied per side by the child list, never here.
    pub(crate) fn partition_sets(
        &self,
        record: &BuildRecord,
    ) -> (PrimInfo, PrimSet, PrimInfo, PrimSet) {
        match record.split {
            Split::Object(split) => partition_object(&record.prims, &split),
            Split::Temporal(_) => {
                debug_assert!(false, "temporal splits are applied per side");
                deterministic_order(&record.prims);
                partition_fallback(&record.prims)
            }
            Split::Fallback | Split::Invalid => {
                trace!(size = record.size(), "median fallback split");
                deterministic_order(&record.prims);
                partition_fallback(&record.prims)
            }
        }
    }

    fn create_large_leaf<A, N, R, CA, CN, UN, CL, PM>(
        &self,
        record: BuildRecord,
        alloc: &mut A,
        ops: &BuildOps<CA, CN, UN, CL, PM>,
    ) -> Result<R, BuildError>
    where
        CA: Fn() -> A + Sync,
        CN: Fn(&BuildRecord, &[BuildRecord], &mut A) -> N + Sync,
        UN: Fn(N, &PrimSet, Vec<R>) -> R + Sync,
        CL: Fn(&BuildRecord, &mut A) -> R + Sync,
        PM: Fn(usize) + Sync,
        A: Send,
        R: Send,
    {
        if record.depth > self.max_depth {
            return Err(BuildError::DepthLimit(self.max_depth));
        }

        if record.size() <= self.max_leaf_size {
            return Ok((ops.create_leaf)(&record, alloc));
        }

        // Fill the node by always splitting the child with the most
        // primitives at its median.
        let depth = record.depth;
        let mut children = vec![record.clone()];
        while children.len() < self.branching_factor {
            let mut best: Option<usize> = None;
            let mut best_size = self.max_leaf_size;
            for (slot, child) in children.iter().enumerate() {
                if child.size() > best_size {
                    best_size = child.size();
                    best = Some(slot);
                }
            }
            let slot = match best {
                Some(slot) => slot,
                None => break,
            };

            let source = children.swap_remove(slot);
            let (linfo, lset, rinfo, rset) = partition_fallback(&source.prims);
            children.push(BuildRecord::new(lset, linfo, depth + 1));
            children.push(BuildRecord::new(rset, rinfo, depth + 1));
        }

        let node = (ops.create_node)(&record, &children, alloc);
        let mut values = Vec::with_capacity(children.len());
        for child in &children {
            values.push(self.create_large_leaf(child.clone(), alloc, ops)?);
        }
        Ok((ops.update_node)(node, &record.prims, values))
    }

    fn recurse<A, N, R, CA, CN, UN, CL, PM>(
        &self,
        record: BuildRecord,
        alloc: &mut A,
        toplevel: bool,
        ops: &BuildOps<CA, CN, UN, CL, PM>,
    ) -> Result<R, BuildError>
    where
        CA: Fn() -> A + Sync,
        CN: Fn(&BuildRecord, &[BuildRecord], &mut A) -> N + Sync,
        UN: Fn(N, &PrimSet, Vec<R>) -> R + Sync,
        CL: Fn(&BuildRecord, &mut A) -> R + Sync,
        PM: Fn(usize) + Sync,
        A: Send,
        R: Send,
    {
        // Once a sub-tree fits the single-threaded threshold it is about
        // to be processed start to finish, which makes a useful progress
        // signal.
        if toplevel && record.size() <= self.single_thread_threshold {
            (ops.progress)(record.size());
        }

        let leaf_sah = self.intersection_cost * record.info.leaf_sah(self.log_block_size);
        let split_sah = self.traversal_cost * record.info.expected_half_area()
            + self.intersection_cost * record.split.cost();

        if record.size() <= self.min_leaf_size
            || record.depth + MIN_LARGE_LEAF_LEVELS >= self.max_depth
            || (record.size() <= self.max_leaf_size && leaf_sah <= split_sah)
        {
            deterministic_order(&record.prims);
            return self.create_large_leaf(record, alloc, ops);
        }

        // Grow children until the node is full or nothing is worth
        // splitting. State recovery is only needed when the temporal gate
        // is open somewhere in this sub-tree.
        let gate_open = record.prims.time_span.size() * record.info.max_time_segments as f32
            > TEMPORAL_GATE_SEGMENTS;
        let mut children = LocalChildren::new(record.clone(), gate_open);
        while children.len() < self.branching_factor {
            match children.best(self.min_leaf_size) {
                Some(slot) => children.split(self, slot),
                None => break,
            }
        }

        let child_records = children.records();
        let node = (ops.create_node)(&record, &child_records, alloc);

        let values: Vec<R> =
            if record.size() > self.single_thread_threshold && !children.has_time_splits() {
                // Object-split children own disjoint ranges; fan out.
                child_records
                    .into_par_iter()
                    .map(|child| {
                        let mut alloc = (ops.create_alloc)();
                        self.recurse(child, &mut alloc, true, ops)
                    })
                    .collect::<Result<Vec<R>, BuildError>>()?
            } else {
                // Last to first, re-deriving each child's state after its
                // siblings' sub-trees have reused the shared array.
                let mut values: Vec<Option<R>> = (0..child_records.len()).map(|_| None).collect();
                for slot in (0..child_records.len()).rev() {
                    children.restore(self, slot);
                    let child = children.record(slot).clone();
                    values[slot] = Some(self.recurse(child, alloc, false, ops)?);
                }
                values.into_iter().map(|value| value.unwrap()).collect()
            };

        Ok((ops.update_node)(node, &record.prims, values))
    }

    /// Builds the tree for `prims`, consuming the collaborators' results
    /// bottom-up and returning the root reduction value.
    pub fn build<A, N, R, CA, CN, UN, CL, PM>(
        &self,
        prims: Vec<PrimRef>,
        info: PrimInfo,
        ops: &BuildOps<CA, CN, UN, CL, PM>,
    ) -> Result<R, BuildError>
    where
        CA: Fn() -> A + Sync,
        CN: Fn(&BuildRecord, &[BuildRecord], &mut A) -> N + Sync,
        UN: Fn(N, &PrimSet, Vec<R>) -> R + Sync,
        CL: Fn(&BuildRecord, &mut A) -> R + Sync,
        PM: Fn(usize) + Sync,
        A: Send,
        R: Send,
    {
        self.validate()?;
        debug_assert_eq!(prims.len(), info.num);
        debug!(
            prims = prims.len(),
            branching_factor = self.branching_factor,
            "building motion bvh"
        );

        let set = PrimSet::from_vec(prims, info.time_span);
        let mut record = BuildRecord::new(set, info, 0);
        record.split = self.find(&record);

        let mut alloc = (ops.create_alloc)();
        let root = self.recurse(record, &mut alloc, true, ops)?;
        debug!("motion bvh build finished");
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lbounds::TimeSpan;
    use crate::prim_ref::build_prim_refs;
    use crate::tests::{crossing_paths, TestScene};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Minimal collaborator set: counts leaves and sums leaf sizes.
    fn leaf_ops() -> BuildOps<
        impl Fn() -> usize + Sync,
        impl Fn(&BuildRecord, &[BuildRecord], &mut usize) + Sync,
        impl Fn((), &PrimSet, Vec<usize>) -> usize + Sync,
        impl Fn(&BuildRecord, &mut usize) -> usize + Sync,
        impl Fn(usize) + Sync,
    > {
        BuildOps {
            create_alloc: || 0usize,
            create_node: |_parent: &BuildRecord, _children: &[BuildRecord], _alloc: &mut usize| {},
            update_node: |_node: (), _prims: &PrimSet, values: Vec<usize>| {
                values.into_iter().sum::<usize>()
            },
            create_leaf: |record: &BuildRecord, _alloc: &mut usize| record.size(),
            progress: |_count: usize| {},
        }
    }

    fn record_for(scene: &TestScene) -> BuildRecord {
        let (prims, info) = build_prim_refs(scene, &scene.ids(), TimeSpan::UNIT);
        BuildRecord::new(
            crate::prim_ref::PrimSet::from_vec(prims, info.time_span),
            info,
            0,
        )
    }

    #[test]
    fn branching_factor_is_validated_at_construction() {
        let scene = TestScene::with_static(&[[0.0; 3]], 0.5);
        assert_eq!(
            MotionSahBuilder::new(&scene, 1).unwrap_err(),
            BuildError::BranchingFactor(1)
        );
        assert_eq!(
            MotionSahBuilder::new(&scene, 9).unwrap_err(),
            BuildError::BranchingFactor(9)
        );
        assert!(MotionSahBuilder::new(&scene, 8).is_ok());
    }

    #[test]
    fn settings_are_validated_before_building() {
        let scene = TestScene::with_static(&[[0.0; 3]], 0.5);
        let ids = scene.ids();

        let builder = MotionSahBuilder::new(&scene, 2).unwrap().with_log_block_size(5);
        let (prims, info) = build_prim_refs(&scene, &ids, TimeSpan::UNIT);
        assert_eq!(
            builder.build(prims, info, &leaf_ops()).unwrap_err(),
            BuildError::LogBlockSize(5)
        );

        let builder = MotionSahBuilder::new(&scene, 2).unwrap().with_leaf_size(4, 2);
        let (prims, info) = build_prim_refs(&scene, &ids, TimeSpan::UNIT);
        assert_eq!(
            builder.build(prims, info, &leaf_ops()).unwrap_err(),
            BuildError::LeafSizeRange(4, 2)
        );

        let builder = MotionSahBuilder::new(&scene, 2).unwrap().with_traversal_cost(0.0);
        let (prims, info) = build_prim_refs(&scene, &ids, TimeSpan::UNIT);
        assert_eq!(
            builder.build(prims, info, &leaf_ops()).unwrap_err(),
            BuildError::NonPositiveCost
        );
    }

    #[test]
    fn find_prefers_the_cheaper_cost_space() {
        // Two clusters far apart: the object split is decisive even
        // though the temporal gate is open.
        let mut paths = crossing_paths();
        for path in crossing_paths() {
            let shifted: Vec<[f32; 3]> = path
                .iter()
                .map(|p| [p[0] + 500.0, p[1], p[2]])
                .collect();
            paths.push(shifted);
        }
        let scene = TestScene::with_paths(&paths, 0.5);
        let builder = MotionSahBuilder::new(&scene, 2).unwrap();
        let record = record_for(&scene);

        let object = builder.find_object_split(&record).expect("clusters split");
        let chosen = builder.find(&record);
        match chosen {
            Split::Object(split) => assert_eq!(split.cost, object.cost),
            other => panic!("expected object split, got {:?}", other),
        }
        // The selected split can never cost more than the alternative.
        let temporal = find_temporal_split(&scene, &record.prims, &record.info, 0, 1)
            .expect("gate is open");
        assert!(chosen.cost() <= temporal.cost);
    }

    #[test]
    fn find_takes_the_temporal_split_when_objects_coincide() {
        let scene = TestScene::with_paths(&crossing_paths(), 0.5);
        let builder = MotionSahBuilder::new(&scene, 2).unwrap();
        let record = record_for(&scene);

        assert!(builder.find_object_split(&record).is_none());
        match builder.find(&record) {
            Split::Temporal(split) => assert_eq!(split.time, 0.5),
            other => panic!("expected temporal split, got {:?}", other),
        }
    }

    #[test]
    fn depth_exhaustion_is_fatal() {
        let scene = TestScene::with_static(&[[0.0; 3]; 64], 0.5);
        let builder = MotionSahBuilder::new(&scene, 2)
            .unwrap()
            .with_leaf_size(1, 1)
            .with_max_depth(2);
        let (prims, info) = build_prim_refs(&scene, &scene.ids(), TimeSpan::UNIT);
        assert_eq!(
            builder.build(prims, info, &leaf_ops()).unwrap_err(),
            BuildError::DepthLimit(2)
        );
    }

    #[test]
    fn generic_collaborators_see_every_primitive() {
        let scene = TestScene::with_paths(&crossing_paths(), 0.5);
        let builder = MotionSahBuilder::new(&scene, 4).unwrap().with_leaf_size(1, 2);
        let (prims, info) = build_prim_refs(&scene, &scene.ids(), TimeSpan::UNIT);

        let progressed = AtomicUsize::new(0);
        let ops = BuildOps {
            create_alloc: || (),
            create_node: |_parent: &BuildRecord, _children: &[BuildRecord], _alloc: &mut ()| {},
            update_node: |_node: (), _prims: &PrimSet, values: Vec<usize>| {
                values.into_iter().sum::<usize>()
            },
            create_leaf: |record: &BuildRecord, _alloc: &mut ()| record.size(),
            progress: |count: usize| {
                progressed.fetch_add(count, Ordering::Relaxed);
            },
        };
        let total = builder.build(prims, info, &ops).unwrap();

        // One temporal split duplicates all four primitives once.
        assert_eq!(total, 8);
        assert!(progressed.load(Ordering::Relaxed) > 0);
    }
}
