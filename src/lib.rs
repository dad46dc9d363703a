//! Impulse-based rigid body dynamics: broadphase AABB tree, support-mapped
//! narrowphase (MPR with an EPA fallback), persistent contact manifolds,
//! sequential impulse solving with substeps, and island-based sleeping.

pub mod collections;
pub mod collision;
pub mod dynamics;
pub mod error;
pub mod handles;
pub mod linear_math;
pub mod logging;
pub mod shapes;

pub use dynamics::constraints::{Constraint, ConstraintData, DistanceConstraint};
pub use dynamics::world::{ThreadModel, World, WorldConfiguration};
pub use error::PhysicsError;
pub use handles::{BodyHandle, ConstraintHandle, ShapeHandle};
pub use shapes::{BoxShape, CapsuleShape, ShapeKind, SphereShape, TriangleShape};
