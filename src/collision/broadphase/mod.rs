pub mod dynamic_aabb_tree;

pub use dynamic_aabb_tree::{DynamicAabbTree, NULL_NODE};

/// Extra slack added around leaf bounds so slow-moving proxies do not churn
/// the tree every step.
pub const AABB_MARGIN: f32 = 0.05;
