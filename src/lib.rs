mod aabb;
pub mod builders;
mod bvh;
mod bvh_node;
mod lbounds;
mod prim_ref;
mod scene;
mod utils;

pub use aabb::*;
pub use builders::*;
pub use bvh::*;
pub use bvh_node::*;
pub use lbounds::*;
pub use prim_ref::*;
pub use scene::*;
pub use utils::SharedVec;
