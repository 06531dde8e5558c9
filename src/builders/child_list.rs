use super::motion_sah::MotionSahBuilder;
use super::time_bin::apply_temporal_split;
use super::{BuildRecord, Split, MAX_BRANCHING_FACTOR};
use crate::scene::MotionGeometry;

/// Picks the child worth splitting next: the largest expected half-area
/// among children still above the leaf threshold, first wins on ties.
fn best_child<'a, I>(records: I, min_leaf_size: usize) -> Option<usize>
where
    I: Iterator<Item = &'a BuildRecord>,
{
    let mut best: Option<(usize, f32)> = None;
    for (slot, record) in records.enumerate() {
        if record.size() <= min_leaf_size {
            continue;
        }
        let area = record.info.expected_half_area();
        if best.map_or(true, |(_, best_area)| area > best_area) {
            best = Some((slot, area));
        }
    }
    best.map(|(slot, _)| slot)
}

/// Pending children of a node that cannot split temporally anywhere in
/// its sub-tree. Object partitions hand each child a disjoint range, so
/// no state ever has to be reconstructed.
pub(crate) struct LocalChildList {
    children: Vec<BuildRecord>,
    depth: usize,
}

impl LocalChildList {
    pub(crate) fn new(record: BuildRecord) -> LocalChildList {
        let depth = record.depth;
        let mut children = Vec::with_capacity(MAX_BRANCHING_FACTOR);
        children.push(record);
        LocalChildList { children, depth }
    }

    pub(crate) fn len(&self) -> usize {
        self.children.len()
    }

    pub(crate) fn record(&self, slot: usize) -> &BuildRecord {
        &self.children[slot]
    }

    pub(crate) fn best(&self, min_leaf_size: usize) -> Option<usize> {
        best_child(self.children.iter(), min_leaf_size)
    }

    pub(crate) fn split<S: MotionGeometry>(&mut self, builder: &MotionSahBuilder<S>, slot: usize) {
        let parent = self.children[slot].clone();
        debug_assert!(!parent.split.is_temporal());

        let (linfo, lset, rinfo, rset) = builder.partition_sets(&parent);
        let mut left = BuildRecord::new(lset, linfo, self.depth + 1);
        left.split = builder.find(&left);
        let mut right = BuildRecord::new(rset, rinfo, self.depth + 1);
        right.split = builder.find(&right);

        self.children[slot] = left;
        self.children.push(right);
    }
}

struct TreeNode {
    record: BuildRecord,
    /// False when this node's array state has been overwritten by its
    /// temporal sibling and must be re-derived before use.
    valid: bool,
    parent: Option<usize>,
    lchild: Option<usize>,
    rchild: Option<usize>,
}

/// Pending children of a node whose sub-tree may split temporally.
///
/// Temporal splits rewrite the parent's array range for one side at a
/// time, so the expansion is kept as a binary tree: before a child is
/// split or recursed into, the path from the root is replayed, re-running
/// every partition whose array state went stale.
pub(crate) struct LocalRecordTree {
    nodes: Vec<TreeNode>,
    children: Vec<usize>,
    depth: usize,
    has_time_split: bool,
}

impl LocalRecordTree {
    pub(crate) fn new(record: BuildRecord) -> LocalRecordTree {
        let depth = record.depth;
        let mut nodes = Vec::with_capacity(2 * MAX_BRANCHING_FACTOR);
        nodes.push(TreeNode {
            record,
            valid: true,
            parent: None,
            lchild: None,
            rchild: None,
        });
        LocalRecordTree {
            nodes,
            children: vec![0],
            depth,
            has_time_split: false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.children.len()
    }

    pub(crate) fn record(&self, slot: usize) -> &BuildRecord {
        &self.nodes[self.children[slot]].record
    }

    pub(crate) fn has_time_splits(&self) -> bool {
        self.has_time_split
    }

    pub(crate) fn best(&self, min_leaf_size: usize) -> Option<usize> {
        best_child(
            self.children.iter().map(|&idx| &self.nodes[idx].record),
            min_leaf_size,
        )
    }

    fn add(&mut self, record: BuildRecord, parent: usize, right: bool, valid: bool) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(TreeNode {
            record,
            valid,
            parent: Some(parent),
            lchild: None,
            rchild: None,
        });
        if right {
            self.nodes[parent].rchild = Some(idx);
        } else {
            self.nodes[parent].lchild = Some(idx);
        }
        idx
    }

    pub(crate) fn split<S: MotionGeometry>(&mut self, builder: &MotionSahBuilder<S>, slot: usize) {
        self.restore(builder, slot);

        let node_idx = self.children[slot];
        let parent = self.nodes[node_idx].record.clone();
        let depth = self.depth + 1;

        match parent.split {
            Split::Temporal(split) => {
                self.has_time_split = true;

                let (linfo, lset) =
                    apply_temporal_split(builder.scene(), &parent.prims, split.time, false);
                let mut left = BuildRecord::new(lset, linfo, depth);
                left.split = builder.find(&left);

                let (rinfo, rset) =
                    apply_temporal_split(builder.scene(), &parent.prims, split.time, true);
                let mut right = BuildRecord::new(rset, rinfo, depth);
                right.split = builder.find(&right);

                // The right side was derived last, so the array currently
                // holds its state and the left child starts out stale.
                let left_idx = self.add(left, node_idx, false, false);
                let right_idx = self.add(right, node_idx, true, true);
                self.children[slot] = left_idx;
                self.children.push(right_idx);
            }
            _ => {
                let (linfo, lset, rinfo, rset) = builder.partition_sets(&parent);
                let mut left = BuildRecord::new(lset, linfo, depth);
                left.split = builder.find(&left);
                let mut right = BuildRecord::new(rset, rinfo, depth);
                right.split = builder.find(&right);

                let left_idx = self.add(left, node_idx, false, true);
                let right_idx = self.add(right, node_idx, true, true);
                self.children[slot] = left_idx;
                self.children.push(right_idx);
            }
        }
    }

    /// Replays the path from the expansion root down to `slot`, re-running
    /// every partition whose array state a temporal sibling overwrote.
    pub(crate) fn restore<S: MotionGeometry>(&mut self, builder: &MotionSahBuilder<S>, slot: usize) {
        let child = self.children[slot];
        if let Some(parent) = self.nodes[child].parent {
            self.restore_path(builder, parent, child);
        }
    }

    fn restore_path<S: MotionGeometry>(
        &mut self,
        builder: &MotionSahBuilder<S>,
        node: usize,
        child: usize,
    ) -> bool {
        let mut stale = !self.nodes[child].valid;
        if let Some(parent) = self.nodes[node].parent {
            stale |= self.restore_path(builder, parent, node);
        }
        if !stale {
            return false;
        }

        let lchild = self.nodes[node].lchild.unwrap();
        let rchild = self.nodes[node].rchild.unwrap();
        let record = self.nodes[node].record.clone();

        match record.split {
            Split::Temporal(split) => {
                // Re-derive only the side we are descending into; the
                // sibling is now the stale one.
                let right = rchild == child;
                let (info, set) =
                    apply_temporal_split(builder.scene(), &record.prims, split.time, right);
                let target = &mut self.nodes[child].record;
                target.info = info;
                target.prims = set;
                self.nodes[lchild].valid = !right;
                self.nodes[rchild].valid = right;
            }
            _ => {
                // An object or median partition restores both sides at
                // once; the children keep their previously found splits.
                let (linfo, lset, rinfo, rset) = builder.partition_sets(&record);
                let left = &mut self.nodes[lchild].record;
                left.info = linfo;
                left.prims = lset;
                let right = &mut self.nodes[rchild].record;
                right.info = rinfo;
                right.prims = rset;
            }
        }
        stale
    }
}

/// The two expansion strategies behind one interface.
pub(crate) enum LocalChildren {
    Plain(LocalChildList),
    Tracked(LocalRecordTree),
}

impl LocalChildren {
    /// `may_split_time` selects the tracked variant; a node whose time
    /// window cannot open the temporal gate never needs state recovery.
    pub(crate) fn new(record: BuildRecord, may_split_time: bool) -> LocalChildren {
        if may_split_time {
            LocalChildren::Tracked(LocalRecordTree::new(record))
        } else {
            LocalChildren::Plain(LocalChildList::new(record))
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            LocalChildren::Plain(list) => list.len(),
            LocalChildren::Tracked(tree) => tree.len(),
        }
    }

    pub(crate) fn record(&self, slot: usize) -> &BuildRecord {
        match self {
            LocalChildren::Plain(list) => list.record(slot),
            LocalChildren::Tracked(tree) => tree.record(slot),
        }
    }

    pub(crate) fn records(&self) -> Vec<BuildRecord> {
        (0..self.len()).map(|slot| self.record(slot).clone()).collect()
    }

    pub(crate) fn has_time_splits(&self) -> bool {
        match self {
            LocalChildren::Plain(_) => false,
            LocalChildren::Tracked(tree) => tree.has_time_splits(),
        }
    }

    pub(crate) fn best(&self, min_leaf_size: usize) -> Option<usize> {
        match self {
            LocalChildren::Plain(list) => list.best(min_leaf_size),
            LocalChildren::Tracked(tree) => tree.best(min_leaf_size),
        }
    }

    pub(crate) fn split<S: MotionGeometry>(&mut self, builder: &MotionSahBuilder<S>, slot: usize) {
        match self {
            LocalChildren::Plain(list) => list.split(builder, slot),
            LocalChildren::Tracked(tree) => tree.split(builder, slot),
        }
    }

    pub(crate) fn restore<S: MotionGeometry>(&mut self, builder: &MotionSahBuilder<S>, slot: usize) {
        match self {
            LocalChildren::Plain(_) => {}
            LocalChildren::Tracked(tree) => tree.restore(builder, slot),
        }
    }
}
