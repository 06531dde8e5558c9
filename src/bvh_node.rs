use crate::aabb::Aabb;
use crate::builders::MAX_BRANCHING_FACTOR;
use crate::lbounds::{LinearBounds, TimeSpan};
use serde::{Deserialize, Serialize};

/// Reference to a child of an interior node.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRef {
    None,
    Node(u32),
    Leaf(u32),
}

impl NodeRef {
    #[inline]
    pub fn is_some(&self) -> bool {
        !matches!(self, NodeRef::None)
    }
}

/// Interior node of the produced tree: up to `MAX_BRANCHING_FACTOR`
/// children, each with its own linear bounds and time interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionNode {
    pub children: [NodeRef; MAX_BRANCHING_FACTOR],
    pub lbounds: [LinearBounds; MAX_BRANCHING_FACTOR],
    pub time: [TimeSpan; MAX_BRANCHING_FACTOR],
    pub num_children: usize,
}

impl Default for MotionNode {
    fn default() -> Self {
        MotionNode::new()
    }
}

impl MotionNode {
    pub fn new() -> MotionNode {
        MotionNode {
            children: [NodeRef::None; MAX_BRANCHING_FACTOR],
            lbounds: [LinearBounds::empty(); MAX_BRANCHING_FACTOR],
            time: [TimeSpan::UNIT; MAX_BRANCHING_FACTOR],
            num_children: 0,
        }
    }

    pub fn set_child(&mut self, slot: usize, child: NodeRef, lbounds: LinearBounds, time: TimeSpan) {
        debug_assert!(slot < MAX_BRANCHING_FACTOR);
        self.children[slot] = child;
        self.lbounds[slot] = lbounds;
        self.time[slot] = time;
        self.num_children = self.num_children.max(slot + 1);
    }

    pub fn child_slots(&self) -> impl Iterator<Item = (NodeRef, &LinearBounds, TimeSpan)> + '_ {
        (0..self.num_children)
            .map(move |slot| (self.children[slot], &self.lbounds[slot], self.time[slot]))
    }

    /// Static box bounding all children over their whole intervals.
    pub fn bounds(&self) -> Aabb {
        let mut bounds = Aabb::empty();
        for slot in 0..self.num_children {
            bounds.grow_bb(&self.lbounds[slot].global());
        }
        bounds
    }
}

/// Leaf of the produced tree: the set of (geometry id, primitive id)
/// pairs it holds, valid over its time interval. The pairs are kept
/// sorted, so equal leaves compare equal regardless of partition order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionLeaf {
    pub prims: Vec<(u32, u32)>,
    pub lbounds: LinearBounds,
    pub time_span: TimeSpan,
}

impl MotionLeaf {
    pub fn len(&self) -> usize {
        self.prims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prims.is_empty()
    }
}
