use super::{Constraint, ConstraintData};
use crate::dynamics::constraint_solver::SolverRow;
use crate::dynamics::rigid_body::RigidBodyData;
use glam::Vec3A;

/// Keeps two body-local anchor points at a fixed separation. With
/// `target_distance` zero this is a ball-socket joint solved along the
/// current offset axis.
pub struct DistanceConstraint {
    pub local_anchor1: Vec3A,
    pub local_anchor2: Vec3A,
    pub target_distance: f32,
    /// Positional correction gain per substep.
    pub bias_factor: f32,
    pub enabled: bool,
}

impl DistanceConstraint {
    #[must_use]
    pub fn new(local_anchor1: Vec3A, local_anchor2: Vec3A, target_distance: f32) -> Self {
        Self {
            local_anchor1,
            local_anchor2,
            target_distance,
            bias_factor: 0.2,
            enabled: true,
        }
    }
}

impl Constraint for DistanceConstraint {
    fn prepare(
        &mut self,
        dt: f32,
        body1: &RigidBodyData,
        body2: &RigidBodyData,
        data: &mut ConstraintData,
    ) {
        data.rows.clear();

        let r1 = body1.orientation * self.local_anchor1;
        let r2 = body2.orientation * self.local_anchor2;
        let p1 = body1.position + r1;
        let p2 = body2.position + r2;

        let delta = p1 - p2;
        let length = delta.length();
        let axis = if length > 1e-6 { delta / length } else { Vec3A::Y };
        let error = length - self.target_distance;

        let mut row = SolverRow::with_jacobian(
            axis,
            r1.cross(axis),
            -axis,
            -(r2.cross(axis)),
            body1,
            body2,
            1.0,
        );
        let rel_vel = row.relative_velocity(body1, body2);
        row.rhs = (-error * self.bias_factor / dt - rel_vel) * row.effective_mass;
        data.rows.push(row);
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::BodyHandle;

    #[test]
    fn stretch_produces_restoring_bias() {
        let mut a = RigidBodyData::new();
        a.position = Vec3A::new(0.0, 2.0, 0.0);
        let b = RigidBodyData::new();

        let mut constraint = DistanceConstraint::new(Vec3A::ZERO, Vec3A::ZERO, 1.0);
        let mut data = ConstraintData::new(BodyHandle(0), BodyHandle(1));
        constraint.prepare(1.0 / 60.0, &a, &b, &mut data);

        assert_eq!(data.rows.len(), 1);
        let row = &data.rows[0];
        // stretched by 1: the impulse must pull body1 down (axis is +y)
        assert!(row.rhs < 0.0);
        assert!(row.linear_a.y > 0.99);
    }

    #[test]
    fn at_rest_no_bias() {
        let mut a = RigidBodyData::new();
        a.position = Vec3A::new(0.0, 1.0, 0.0);
        let b = RigidBodyData::new();

        let mut constraint = DistanceConstraint::new(Vec3A::ZERO, Vec3A::ZERO, 1.0);
        let mut data = ConstraintData::new(BodyHandle(0), BodyHandle(1));
        constraint.prepare(1.0 / 60.0, &a, &b, &mut data);
        assert!(data.rows[0].rhs.abs() < 1e-6);
    }

    #[test]
    fn disabled_flag_round_trips() {
        let mut constraint = DistanceConstraint::new(Vec3A::ZERO, Vec3A::ZERO, 1.0);
        assert!(constraint.is_enabled());
        constraint.enabled = false;
        assert!(!constraint.is_enabled());
    }
}
