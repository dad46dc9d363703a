use crate::dynamics::constraint_solver::SolverRow;
use crate::dynamics::rigid_body::RigidBodyData;
use crate::handles::BodyHandle;
use arrayvec::ArrayVec;

pub mod distance;

pub use distance::DistanceConstraint;

pub const MAX_CONSTRAINT_ROWS: usize = 6;

/// Solver-facing block a concrete constraint fills during prepare. The
/// accumulated impulses are cached here by the solver between steps, so
/// implementations only describe Jacobians, bias and bounds.
pub struct ConstraintData {
    pub body1: BodyHandle,
    pub body2: BodyHandle,
    pub rows: ArrayVec<SolverRow, MAX_CONSTRAINT_ROWS>,
    pub(crate) impulse_cache: [f32; MAX_CONSTRAINT_ROWS],
    pub(crate) initialized: bool,
}

impl ConstraintData {
    #[must_use]
    pub fn new(body1: BodyHandle, body2: BodyHandle) -> Self {
        Self {
            body1,
            body2,
            rows: ArrayVec::new(),
            impulse_cache: [0.0; MAX_CONSTRAINT_ROWS],
            initialized: false,
        }
    }
}

/// Plugin contract for persistent constraints. `prepare` is called once per
/// substep with the two bodies' current state and must clear and refill
/// `data.rows` (at most [`MAX_CONSTRAINT_ROWS`]); the solver then iterates
/// those rows like contact rows, warm-started from its own impulse cache.
/// Disabled constraints are skipped without being removed.
pub trait Constraint: Send {
    fn prepare(
        &mut self,
        dt: f32,
        body1: &RigidBodyData,
        body2: &RigidBodyData,
        data: &mut ConstraintData,
    );

    fn is_enabled(&self) -> bool {
        true
    }
}
