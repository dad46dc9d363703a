//! Sequential-impulse velocity solver. Rows are prepared per island into a
//! reusable scratch buffer, warm-started from the persistent records, then
//! iterated serially within the island while islands run in parallel.

use crate::collision::narrowphase::arbiter::ContactData;
use crate::dynamics::rigid_body::RigidBodyData;
use crate::linear_math::plane_space;
use glam::Vec3A;

pub mod solver_row;

pub use solver_row::{NO_NORMAL_ROW, SolverRow};
pub(crate) use solver_row::{ContactRowKind, RowSource, SOLVER_FIXED};

#[derive(Clone, Copy, Debug)]
pub struct SolverSettings {
    /// Baumgarte factor on penetration beyond the slop.
    pub erp: f32,
    /// Penetration tolerated without positional correction.
    pub linear_slop: f32,
    /// Closing speeds below this don't bounce.
    pub restitution_velocity_threshold: f32,
    /// Successive over-relaxation factor folded into the effective mass.
    pub relaxation: f32,
    /// Fraction of the cached impulse replayed on prepare.
    pub warm_start_factor: f32,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            erp: 0.2,
            linear_slop: 0.002,
            restitution_velocity_threshold: 0.5,
            relaxation: 1.0,
            warm_start_factor: 0.85,
        }
    }
}

fn restitution_curve(rel_vel: f32, restitution: f32, velocity_threshold: f32) -> f32 {
    if rel_vel.abs() < velocity_threshold {
        0.0
    } else {
        (restitution * -rel_vel).max(0.0)
    }
}

/// Builds the normal and two friction rows for every live manifold point.
/// `slot_a`/`slot_b` are pool positions, or `SOLVER_FIXED` to route the
/// static side's writes to the island dummy; geometry always comes from the
/// real records.
#[allow(clippy::too_many_arguments)]
pub(crate) fn push_contact_rows(
    rows: &mut Vec<SolverRow>,
    arbiter_handle: u32,
    arbiter: &ContactData,
    a: &RigidBodyData,
    b: &RigidBodyData,
    slot_a: u32,
    slot_b: u32,
    settings: &SolverSettings,
    h: f32,
) {
    let inv_h = 1.0 / h;

    for slot in arbiter.live_slots() {
        let point = &arbiter.points[slot];
        let n = point.normal;

        let rel1 = point.world_a - a.position;
        let rel2 = point.world_b - b.position;

        let mut normal_row = SolverRow::with_jacobian(
            n,
            rel1.cross(n),
            -n,
            -(rel2.cross(n)),
            a,
            b,
            settings.relaxation,
        );

        let rel_vel = normal_row.relative_velocity(a, b);
        let restitution =
            restitution_curve(rel_vel, arbiter.restitution, settings.restitution_velocity_threshold);
        let velocity_error = restitution - rel_vel;

        normal_row.rhs = if point.distance > 0.0 {
            // speculative: admit only the share of the approach that would
            // consume the gap this substep, which caps the impulse
            (velocity_error - point.distance * inv_h) * normal_row.effective_mass
        } else {
            let penetration = point.distance + settings.linear_slop;
            let positional_error = if penetration > 0.0 {
                0.0
            } else {
                -penetration * settings.erp * inv_h
            };
            (velocity_error + positional_error) * normal_row.effective_mass
        };

        normal_row.lower_limit = 0.0;
        normal_row.upper_limit = f32::INFINITY;
        normal_row.applied_impulse = point.normal_impulse * settings.warm_start_factor;
        normal_row.body_a = slot_a;
        normal_row.body_b = slot_b;
        normal_row.source = RowSource::Contact {
            arbiter: arbiter_handle,
            slot: slot as u8,
            kind: ContactRowKind::Normal,
        };
        let normal_index = rows.len() as u32;
        rows.push(normal_row);

        // friction frame: first axis along the lateral slip when there is
        // any, so kinetic friction opposes the actual motion
        let vel = a.velocity_at(rel1) - b.velocity_at(rel2);
        let lateral = vel - n * vel.dot(n);
        let (t1, t2) = if lateral.length_squared() > 1e-8 {
            let t1 = lateral.normalize();
            (t1, n.cross(t1))
        } else {
            plane_space(n)
        };

        for (kind, tangent, cached) in [
            (ContactRowKind::Tangent1, t1, point.tangent_impulse1),
            (ContactRowKind::Tangent2, t2, point.tangent_impulse2),
        ] {
            let mut row = SolverRow::with_jacobian(
                tangent,
                rel1.cross(tangent),
                -tangent,
                -(rel2.cross(tangent)),
                a,
                b,
                settings.relaxation,
            );
            row.rhs = -row.relative_velocity(a, b) * row.effective_mass;
            // bounds re-coupled to the normal impulse every iteration
            row.lower_limit = 0.0;
            row.upper_limit = 0.0;
            row.friction = arbiter.friction;
            row.normal_row = normal_index;
            row.applied_impulse = cached * settings.warm_start_factor;
            row.body_a = slot_a;
            row.body_b = slot_b;
            row.source = RowSource::Contact {
                arbiter: arbiter_handle,
                slot: slot as u8,
                kind,
            };
            rows.push(row);
        }
    }
}

/// Clamps `v` to zero when a numerical anomaly slipped in; the offending
/// body simply stops instead of poisoning its island.
#[inline]
pub(crate) fn sanitize(v: Vec3A) -> Vec3A {
    if v.is_finite() { v } else { Vec3A::ZERO }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::narrowphase::ContactSurface;
    use crate::collision::narrowphase::arbiter::ArbiterKey;
    use crate::handles::{BodyHandle, ShapeHandle};
    use glam::Mat3A;

    fn resting_arbiter(distance: f32) -> ContactData {
        let mut arbiter = ContactData::new(
            ArbiterKey::new(ShapeHandle(0), ShapeHandle(1)),
            ShapeHandle(0),
            ShapeHandle(1),
            BodyHandle(0),
            BodyHandle(1),
            0.5,
            0.0,
        );
        let surface = ContactSurface {
            normal: Vec3A::Y,
            point_a: Vec3A::new(0.0, distance, 0.0),
            point_b: Vec3A::ZERO,
            distance,
        };
        arbiter.add_contact(&surface, Vec3A::ZERO, Mat3A::IDENTITY, Vec3A::ZERO, Mat3A::IDENTITY);
        arbiter
    }

    #[test]
    fn three_rows_per_contact_point() {
        let arbiter = resting_arbiter(-0.01);
        let a = RigidBodyData::new();
        let b = RigidBodyData::fixed();
        let mut rows = Vec::new();
        push_contact_rows(&mut rows, 0, &arbiter, &a, &b, 0, SOLVER_FIXED, &SolverSettings::default(), 1.0 / 60.0);

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].lower_limit, 0.0);
        assert_eq!(rows[1].normal_row, 0);
        assert_eq!(rows[2].normal_row, 0);
        assert!((rows[1].friction - 0.5).abs() < 1e-6);
    }

    #[test]
    fn penetration_produces_push_out_bias() {
        let arbiter = resting_arbiter(-0.05);
        let a = RigidBodyData::new();
        let b = RigidBodyData::fixed();
        let mut rows = Vec::new();
        push_contact_rows(&mut rows, 0, &arbiter, &a, &b, 0, SOLVER_FIXED, &SolverSettings::default(), 1.0 / 60.0);
        assert!(rows[0].rhs > 0.0, "deep contact must push apart");
    }

    #[test]
    fn speculative_gap_reduces_rhs() {
        let mut a = RigidBodyData::new();
        a.linear_velocity = Vec3A::new(0.0, -10.0, 0.0);
        let b = RigidBodyData::fixed();
        let settings = SolverSettings::default();

        // positive-separation point 0.1 away: the row may only remove the
        // closing velocity beyond the gap
        let arbiter = resting_arbiter(0.1);
        let mut rows = Vec::new();
        push_contact_rows(&mut rows, 0, &arbiter, &a, &b, 0, SOLVER_FIXED, &settings, 1.0 / 60.0);

        let mut fixed = RigidBodyData::fixed();
        rows[0].resolve(&mut a, &mut fixed);
        let after = a.linear_velocity.y + a.delta_linear_velocity.y;
        // would stop at 0 without the gap; with it the body keeps 0.1/h
        assert!((after + 0.1 * 60.0).abs() < 0.05, "kept approach {after}");
    }

    #[test]
    fn gentle_touch_does_not_bounce() {
        let mut a = RigidBodyData::new();
        a.linear_velocity = Vec3A::new(0.0, -0.1, 0.0);
        let b = RigidBodyData::fixed();

        let mut arbiter = resting_arbiter(-0.001);
        arbiter.restitution = 1.0;
        let mut rows = Vec::new();
        push_contact_rows(&mut rows, 0, &arbiter, &a, &b, 0, SOLVER_FIXED, &SolverSettings::default(), 1.0 / 60.0);

        let mut fixed = RigidBodyData::fixed();
        for _ in 0..8 {
            rows[0].resolve(&mut a, &mut fixed);
        }
        let after = a.linear_velocity.y + a.delta_linear_velocity.y;
        assert!(after.abs() < 0.05, "slow contact bounced to {after}");
    }
}
