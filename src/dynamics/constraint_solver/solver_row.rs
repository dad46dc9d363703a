use crate::dynamics::rigid_body::RigidBodyData;
use glam::Vec3A;

/// Row index sentinel meaning "not coupled to a normal row".
pub const NO_NORMAL_ROW: u32 = u32::MAX;

/// Body slot sentinel: route this side's writes to the island-local fixed
/// dummy instead of a shared static record.
pub(crate) const SOLVER_FIXED: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum RowSource {
    #[default]
    None,
    Contact {
        arbiter: u32,
        slot: u8,
        kind: ContactRowKind,
    },
    Constraint {
        constraint: u32,
        row: u8,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ContactRowKind {
    Normal,
    Tangent1,
    Tangent2,
}

/// One scalar constraint row: a velocity-space Jacobian split per body, the
/// inverse effective mass, bias, bounds and the accumulated impulse that
/// both clamps the update and carries warm-start state.
#[derive(Clone, Copy, Debug, Default)]
pub struct SolverRow {
    pub linear_a: Vec3A,
    pub angular_a: Vec3A,
    pub linear_b: Vec3A,
    pub angular_b: Vec3A,
    /// Inertia-mapped angular Jacobians, precomputed so the iteration applies
    /// impulses with two multiply-adds per body.
    pub angular_component_a: Vec3A,
    pub angular_component_b: Vec3A,
    pub effective_mass: f32,
    pub rhs: f32,
    pub lower_limit: f32,
    pub upper_limit: f32,
    pub applied_impulse: f32,
    pub friction: f32,
    pub normal_row: u32,
    pub(crate) body_a: u32,
    pub(crate) body_b: u32,
    pub(crate) source: RowSource,
}

impl SolverRow {
    /// Builds a row from its Jacobian, computing the inertia-mapped angular
    /// parts and `K⁻¹ = relaxation / (J M⁻¹ Jᵀ)`. Bias, bounds and body slots
    /// are the caller's business.
    #[must_use]
    pub fn with_jacobian(
        linear_a: Vec3A,
        angular_a: Vec3A,
        linear_b: Vec3A,
        angular_b: Vec3A,
        a: &RigidBodyData,
        b: &RigidBodyData,
        relaxation: f32,
    ) -> Self {
        let angular_component_a = a.inverse_inertia_world * angular_a;
        let angular_component_b = b.inverse_inertia_world * angular_b;

        let denom = a.inverse_mass * linear_a.length_squared()
            + angular_a.dot(angular_component_a)
            + b.inverse_mass * linear_b.length_squared()
            + angular_b.dot(angular_component_b);

        let effective_mass = if denom > 1e-10 { relaxation / denom } else { 0.0 };

        Self {
            linear_a,
            angular_a,
            linear_b,
            angular_b,
            angular_component_a,
            angular_component_b,
            effective_mass,
            rhs: 0.0,
            lower_limit: f32::NEG_INFINITY,
            upper_limit: f32::INFINITY,
            applied_impulse: 0.0,
            friction: 0.0,
            normal_row: NO_NORMAL_ROW,
            body_a: SOLVER_FIXED,
            body_b: SOLVER_FIXED,
            source: RowSource::None,
        }
    }

    /// `J · v` over the bodies' primary velocities.
    #[inline]
    #[must_use]
    pub fn relative_velocity(&self, a: &RigidBodyData, b: &RigidBodyData) -> f32 {
        self.linear_a.dot(a.linear_velocity)
            + self.angular_a.dot(a.angular_velocity)
            + self.linear_b.dot(b.linear_velocity)
            + self.angular_b.dot(b.angular_velocity)
    }

    /// Replays the accumulated impulse onto the delta accumulators before
    /// iteration starts.
    pub fn apply_warm_start(&self, a: &mut RigidBodyData, b: &mut RigidBodyData) {
        let impulse = self.applied_impulse;
        a.delta_linear_velocity += self.linear_a * (a.inverse_mass * impulse);
        a.delta_angular_velocity += self.angular_component_a * impulse;
        b.delta_linear_velocity += self.linear_b * (b.inverse_mass * impulse);
        b.delta_angular_velocity += self.angular_component_b * impulse;
    }

    /// One clamped sequential-impulse update. Returns the applied delta.
    pub fn resolve(&mut self, a: &mut RigidBodyData, b: &mut RigidBodyData) -> f32 {
        let mut delta_impulse = self.rhs;

        let delta_vel = self.linear_a.dot(a.delta_linear_velocity)
            + self.angular_a.dot(a.delta_angular_velocity)
            + self.linear_b.dot(b.delta_linear_velocity)
            + self.angular_b.dot(b.delta_angular_velocity);
        delta_impulse -= delta_vel * self.effective_mass;

        let sum = self.applied_impulse + delta_impulse;
        if sum < self.lower_limit {
            delta_impulse = self.lower_limit - self.applied_impulse;
            self.applied_impulse = self.lower_limit;
        } else if sum > self.upper_limit {
            delta_impulse = self.upper_limit - self.applied_impulse;
            self.applied_impulse = self.upper_limit;
        } else {
            self.applied_impulse = sum;
        }

        a.delta_linear_velocity += self.linear_a * (a.inverse_mass * delta_impulse);
        a.delta_angular_velocity += self.angular_component_a * delta_impulse;
        b.delta_linear_velocity += self.linear_b * (b.inverse_mass * delta_impulse);
        b.delta_angular_velocity += self.angular_component_b * delta_impulse;

        delta_impulse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head_on_pair() -> (RigidBodyData, RigidBodyData) {
        let mut a = RigidBodyData::new();
        let mut b = RigidBodyData::new();
        a.linear_velocity = Vec3A::new(-1.0, 0.0, 0.0);
        b.linear_velocity = Vec3A::new(1.0, 0.0, 0.0);
        (a, b)
    }

    fn normal_row(a: &RigidBodyData, b: &RigidBodyData) -> SolverRow {
        let n = Vec3A::X;
        let mut row = SolverRow::with_jacobian(n, Vec3A::ZERO, -n, Vec3A::ZERO, a, b, 1.0);
        row.lower_limit = 0.0;
        row
    }

    #[test]
    fn resolve_kills_closing_velocity() {
        let (mut a, mut b) = head_on_pair();
        let mut row = normal_row(&a, &b);
        // rel_vel = -2 along x: approaching; target rhs cancels it
        let rel_vel = row.relative_velocity(&a, &b);
        assert!((rel_vel + 2.0).abs() < 1e-6);
        row.rhs = -rel_vel * row.effective_mass;

        for _ in 0..4 {
            row.resolve(&mut a, &mut b);
        }

        let va = a.linear_velocity + a.delta_linear_velocity;
        let vb = b.linear_velocity + b.delta_linear_velocity;
        assert!(((va - vb).x).abs() < 1e-4, "closing velocity not removed");
        assert!(row.applied_impulse > 0.0);
    }

    #[test]
    fn clamping_respects_lower_limit() {
        let (mut a, mut b) = head_on_pair();
        // separating bodies: a contact row may not pull them together
        a.linear_velocity = Vec3A::new(1.0, 0.0, 0.0);
        b.linear_velocity = Vec3A::new(-1.0, 0.0, 0.0);
        let mut row = normal_row(&a, &b);
        row.rhs = -row.relative_velocity(&a, &b) * row.effective_mass;

        row.resolve(&mut a, &mut b);
        assert_eq!(row.applied_impulse, 0.0);
        assert_eq!(a.delta_linear_velocity, Vec3A::ZERO);
    }

    #[test]
    fn warm_start_replays_cached_impulse() {
        let (mut a, mut b) = head_on_pair();
        let mut row = normal_row(&a, &b);
        row.applied_impulse = 2.0;
        row.apply_warm_start(&mut a, &mut b);

        // unit masses: ±2 m/s along the normal
        assert!((a.delta_linear_velocity.x - 2.0).abs() < 1e-6);
        assert!((b.delta_linear_velocity.x + 2.0).abs() < 1e-6);
    }

    #[test]
    fn static_side_stays_motionless() {
        let mut a = RigidBodyData::new();
        a.linear_velocity = Vec3A::new(0.0, -3.0, 0.0);
        let mut fixed = RigidBodyData::fixed();

        let n = Vec3A::Y;
        let mut row = SolverRow::with_jacobian(n, Vec3A::ZERO, -n, Vec3A::ZERO, &a, &fixed, 1.0);
        row.lower_limit = 0.0;
        row.rhs = -row.relative_velocity(&a, &fixed) * row.effective_mass;

        row.resolve(&mut a, &mut fixed);
        assert_eq!(fixed.delta_linear_velocity, Vec3A::ZERO);
        assert!((a.delta_linear_velocity.y - 3.0).abs() < 1e-4);
    }
}
