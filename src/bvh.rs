use crate::aabb::Aabb;
use crate::builders::{BuildError, BuildOps, BuildRecord, MotionSahBuilder};
use crate::bvh_node::{MotionLeaf, MotionNode, NodeRef};
use crate::lbounds::{LinearBounds, TimeSpan};
use crate::prim_ref::{build_prim_refs, PrimSet};
use crate::scene::MotionGeometry;
use serde::{Deserialize, Serialize};

const VALIDATE_EPS: f32 = 1e-3;

/// An N-ary motion-blur BVH, the crate's ready-made consumer of the
/// generic builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionBvh {
    pub nodes: Vec<MotionNode>,
    pub leaves: Vec<MotionLeaf>,
    pub root: NodeRef,
}

/// Owned sub-tree produced bottom-up by the build callbacks, flattened
/// into arrays afterwards.
enum BuiltTree {
    Leaf(MotionLeaf),
    Node {
        shells: Vec<(LinearBounds, TimeSpan)>,
        children: Vec<BuiltTree>,
    },
}

impl MotionBvh {
    /// Builds the tree for `ids` over the whole [0, 1] shutter window.
    pub fn construct<S: MotionGeometry>(
        builder: &MotionSahBuilder<S>,
        ids: &[(u32, u32)],
    ) -> Result<MotionBvh, BuildError> {
        let (prims, info) = build_prim_refs(builder.scene(), ids, TimeSpan::UNIT);

        let ops = BuildOps {
            create_alloc: || (),
            create_node: |_parent: &BuildRecord, children: &[BuildRecord], _alloc: &mut ()| {
                children
                    .iter()
                    .map(|child| (child.info.geom_bounds, child.info.time_span))
                    .collect::<Vec<_>>()
            },
            update_node: |shells: Vec<(LinearBounds, TimeSpan)>,
                          _prims: &PrimSet,
                          children: Vec<BuiltTree>| {
                BuiltTree::Node { shells, children }
            },
            create_leaf: |record: &BuildRecord, _alloc: &mut ()| {
                let mut prims: Vec<(u32, u32)> = record
                    .prims
                    .slice()
                    .iter()
                    .map(|prim| (prim.geom_id, prim.prim_id))
                    .collect();
                prims.sort_unstable();
                BuiltTree::Leaf(MotionLeaf {
                    prims,
                    lbounds: record.info.geom_bounds,
                    time_span: record.prims.time_span,
                })
            },
            progress: |_count: usize| {},
        };

        let tree = builder.build(prims, info, &ops)?;
        let mut bvh = MotionBvh {
            nodes: Vec::new(),
            leaves: Vec::new(),
            root: NodeRef::None,
        };
        bvh.root = bvh.flatten(tree);
        Ok(bvh)
    }

    fn flatten(&mut self, tree: BuiltTree) -> NodeRef {
        match tree {
            BuiltTree::Leaf(leaf) => {
                self.leaves.push(leaf);
                NodeRef::Leaf((self.leaves.len() - 1) as u32)
            }
            BuiltTree::Node { shells, children } => {
                let index = self.nodes.len();
                self.nodes.push(MotionNode::new());

                let slots: Vec<(NodeRef, LinearBounds, TimeSpan)> = shells
                    .into_iter()
                    .zip(children)
                    .map(|((lbounds, time), child)| (self.flatten(child), lbounds, time))
                    .collect();
                for (slot, (child, lbounds, time)) in slots.into_iter().enumerate() {
                    self.nodes[index].set_child(slot, child, lbounds, time);
                }
                NodeRef::Node(index as u32)
            }
        }
    }

    /// Static bounds of the whole tree.
    pub fn bounds(&self) -> Aabb {
        match self.root {
            NodeRef::None => Aabb::empty(),
            NodeRef::Node(index) => self.nodes[index as usize].bounds(),
            NodeRef::Leaf(index) => self.leaves[index as usize].lbounds.global(),
        }
    }

    /// Number of primitive entries over all leaves, temporal duplicates
    /// included.
    pub fn prim_count(&self) -> usize {
        self.leaves.iter().map(MotionLeaf::len).sum()
    }

    /// Longest root-to-leaf path, in edges.
    pub fn depth(&self) -> usize {
        self.depth_of(self.root)
    }

    fn depth_of(&self, node: NodeRef) -> usize {
        match node {
            NodeRef::None | NodeRef::Leaf(_) => 0,
            NodeRef::Node(index) => {
                let node = &self.nodes[index as usize];
                1 + node
                    .child_slots()
                    .map(|(child, _, _)| self.depth_of(child))
                    .max()
                    .unwrap_or(0)
            }
        }
    }

    fn leaves_below<'a>(&'a self, node: NodeRef, out: &mut Vec<&'a MotionLeaf>) {
        match node {
            NodeRef::None => {}
            NodeRef::Leaf(index) => out.push(&self.leaves[index as usize]),
            NodeRef::Node(index) => {
                for (child, _, _) in self.nodes[index as usize].child_slots() {
                    self.leaves_below(child, out);
                }
            }
        }
    }

    /// Checks that every interior child's linear bounds contain the
    /// bounds of every primitive in every leaf below it, restricted to
    /// that leaf's time interval.
    pub fn validate<S: MotionGeometry>(&self, scene: &S) -> bool {
        for node in &self.nodes {
            for (child, lbounds, time) in node.child_slots() {
                let mut leaves = Vec::new();
                self.leaves_below(child, &mut leaves);
                for leaf in leaves {
                    debug_assert!(leaf.time_span.lower >= time.lower - VALIDATE_EPS);
                    debug_assert!(leaf.time_span.upper <= time.upper + VALIDATE_EPS);
                    let rel = |t: f32| {
                        if time.size() > 0.0 {
                            (t - time.lower) / time.size()
                        } else {
                            0.0
                        }
                    };
                    let begin = lbounds.interpolate(rel(leaf.time_span.lower));
                    let end = lbounds.interpolate(rel(leaf.time_span.upper));
                    for &(geom_id, prim_id) in &leaf.prims {
                        let prim = scene.linear_bounds(geom_id, prim_id, leaf.time_span);
                        if !begin.contains_bb(&prim.begin, VALIDATE_EPS)
                            || !end.contains_bb(&prim.end, VALIDATE_EPS)
                        {
                            return false;
                        }
                    }
                }
            }
        }
        true
    }
}
