//! Narrowphase driver for one support-mapped shape pair: picks MPR or the
//! GJK/EPA path, filters triangle internal-edge artifacts, accepts
//! speculative contacts for fast movers, and tops up one-point manifolds on
//! flat pairs in a single frame.

use super::arbiter::ContactData;
use super::mpr::MprResult;
use super::{CONTACT_BREAKING_THRESHOLD, ContactSurface, SupportPair, gjk_epa, mpr};
use crate::linear_math::plane_space;
use crate::shapes::ShapeKind;
use glam::Vec3A;

/// Tilt applied to the contact normal when probing for auxiliary manifold
/// points, in radians (small-angle).
const ONE_SHOT_TILT: f32 = 0.15;

/// A probe point may deviate this much from the seed separation and still
/// count as coplanar; curved surfaces overshoot it and stay single-point.
const ONE_SHOT_PLANE_TOLERANCE: f32 = 0.005;

/// Penetration or closest-feature query; `None` when the pair is beyond any
/// useful distance or the geometry defeated both algorithms this frame.
#[must_use]
pub fn collide(pair: &SupportPair, use_full_epa: bool) -> Option<ContactSurface> {
    if use_full_epa {
        return gjk_epa::penetration(pair);
    }

    match mpr::penetration(pair) {
        MprResult::Penetrating(surface) => Some(surface),
        // separated: the gap still matters for speculative contacts
        MprResult::Separated => match gjk_epa::closest_points(pair) {
            gjk_epa::GjkResult::Separated(surface) => Some(surface),
            // MPR and GJK disagree near touching; trust the EPA depth
            gjk_epa::GjkResult::Intersecting(_) | gjk_epa::GjkResult::Failed => {
                gjk_epa::penetration(pair)
            }
        },
        MprResult::NotConverged => gjk_epa::penetration(pair),
    }
}

/// Refreshes the persistent manifold and folds in this frame's narrowphase
/// result. `rel_velocity` is `v_a − v_b` at the pair, used to size the
/// speculative acceptance window when `speculative` is set.
#[allow(clippy::too_many_arguments)]
pub fn update_contact(
    arbiter: &mut ContactData,
    pair: &SupportPair,
    rel_velocity: Vec3A,
    dt: f32,
    speculative: bool,
    use_full_epa: bool,
) {
    arbiter.refresh(pair.pos_a, pair.orn_a, pair.pos_b, pair.orn_b);

    let Some(surface) = collide(pair, use_full_epa) else {
        return;
    };

    let accepted = if surface.distance <= CONTACT_BREAKING_THRESHOLD {
        true
    } else if speculative {
        // emit early only when the closing velocity would consume the gap
        // within the step; the solver then caps its impulse to exactly that
        let closing = -rel_velocity.dot(surface.normal);
        closing * dt + CONTACT_BREAKING_THRESHOLD >= surface.distance
    } else {
        false
    };

    if !accepted || !edge_filter_accepts(pair, surface.normal) {
        return;
    }

    arbiter.add_contact(&surface, pair.pos_a, pair.orn_a, pair.pos_b, pair.orn_b);

    if arbiter.live_count() == 1 && surface.distance <= CONTACT_BREAKING_THRESHOLD {
        one_shot_manifold(arbiter, pair, &surface);
    }
}

/// Rejects contacts whose normal leaves the admissible cone of a triangle
/// shape; internal mesh edges otherwise produce normals that catch bodies
/// sliding across flat geometry.
fn edge_filter_accepts(pair: &SupportPair, normal: Vec3A) -> bool {
    let accepts = |kind: &ShapeKind, orn: glam::Mat3A, toward_other: Vec3A| {
        let Some(triangle) = kind.as_triangle() else {
            return true;
        };
        let world_face = orn * triangle.normal;
        world_face.dot(toward_other).abs() >= triangle.normal_cone_limit()
    };

    // `normal` points from B toward A, so it leaves B's surface and enters A's
    accepts(pair.shape_b, pair.orn_b, normal) && accepts(pair.shape_a, pair.orn_a, -normal)
}

/// Probes the supports around the contact normal to complete a flat-on-flat
/// manifold in one frame instead of collecting points over several. Curved
/// pairs produce distant samples that fail the separation test and are
/// dropped, so only genuinely flat patches gain points.
fn one_shot_manifold(arbiter: &mut ContactData, pair: &SupportPair, surface: &ContactSurface) {
    let normal = surface.normal;
    let seed = surface.point_b;
    let (t1, t2) = plane_space(normal);

    // diagonal probes reach all four corners of a rectangular patch
    for tangent in [t1 + t2, t1 - t2, -t1 + t2, -t1 - t2] {
        let tilt = tangent * (ONE_SHOT_TILT * std::f32::consts::FRAC_1_SQRT_2);
        // matched extreme points on the same tangential side of both faces
        let support_a = pair.support_a(tilt - normal);
        let support_b = pair.support_b(tilt + normal);
        let distance = (support_a - support_b).dot(normal);

        if distance.abs() > CONTACT_BREAKING_THRESHOLD
            || (distance - surface.distance).abs() > ONE_SHOT_PLANE_TOLERANCE
        {
            continue;
        }

        // anchor at the smaller feature: a face much larger than its partner
        // (a ground slab, say) supports a corner far from the patch, so keep
        // whichever witness stayed near the seed contact and project the
        // other onto its surface plane along the normal
        let (point_a, point_b) =
            if (support_a - seed).length_squared() <= (support_b - seed).length_squared() {
                (support_a, support_a - normal * distance)
            } else {
                (support_b + normal * distance, support_b)
            };

        let surface = ContactSurface {
            normal,
            point_a,
            point_b,
            distance,
        };
        arbiter.add_contact(&surface, pair.pos_a, pair.orn_a, pair.pos_b, pair.orn_b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::narrowphase::arbiter::ArbiterKey;
    use crate::handles::{BodyHandle, ShapeHandle};
    use crate::shapes::{BoxShape, SphereShape, TriangleShape};
    use glam::Mat3A;

    fn arbiter() -> ContactData {
        ContactData::new(
            ArbiterKey::new(ShapeHandle(0), ShapeHandle(1)),
            ShapeHandle(0),
            ShapeHandle(1),
            BodyHandle(0),
            BodyHandle(1),
            0.5,
            0.0,
        )
    }

    fn pair_at<'a>(
        a: &'a ShapeKind,
        pos_a: Vec3A,
        b: &'a ShapeKind,
        pos_b: Vec3A,
    ) -> SupportPair<'a> {
        SupportPair {
            shape_a: a,
            pos_a,
            orn_a: Mat3A::IDENTITY,
            shape_b: b,
            pos_b,
            orn_b: Mat3A::IDENTITY,
        }
    }

    #[test]
    fn flat_pair_gets_full_manifold_in_one_frame() {
        let cube = ShapeKind::Box(BoxShape::with_size(1.0, 1.0, 1.0));
        let mut arb = arbiter();
        let pair = pair_at(&cube, Vec3A::new(0.0, 0.99, 0.0), &cube, Vec3A::ZERO);

        update_contact(&mut arb, &pair, Vec3A::ZERO, 1.0 / 60.0, false, false);
        assert!(
            arb.live_count() >= 3,
            "one-shot manifold should find a patch, got {}",
            arb.live_count()
        );
    }

    #[test]
    fn sphere_pair_stays_single_point() {
        let sphere = ShapeKind::Sphere(SphereShape::new(0.5));
        let mut arb = arbiter();
        let pair = pair_at(&sphere, Vec3A::new(0.0, 0.98, 0.0), &sphere, Vec3A::ZERO);

        update_contact(&mut arb, &pair, Vec3A::ZERO, 1.0 / 60.0, false, false);
        assert_eq!(arb.live_count(), 1);
    }

    #[test]
    fn speculative_accepts_fast_approach_only() {
        let cube = ShapeKind::Box(BoxShape::with_size(1.0, 1.0, 1.0));
        let pair = pair_at(&cube, Vec3A::new(0.0, 2.0, 0.0), &cube, Vec3A::ZERO);

        // gap of 1.0: a slow body gets nothing
        let mut slow = arbiter();
        update_contact(
            &mut slow,
            &pair,
            Vec3A::new(0.0, -1.0, 0.0),
            1.0 / 60.0,
            true,
            false,
        );
        assert_eq!(slow.live_count(), 0);

        // approaching 90 m/s covers the gap within one 1/60 step
        let mut fast = arbiter();
        update_contact(
            &mut fast,
            &pair,
            Vec3A::new(0.0, -90.0, 0.0),
            1.0 / 60.0,
            true,
            false,
        );
        assert_eq!(fast.live_count(), 1);
        let slot = fast.live_slots().next().unwrap();
        assert!(fast.points[slot].distance > 0.0);
    }

    #[test]
    fn internal_edge_contacts_are_suppressed() {
        let tri = TriangleShape::new(
            Vec3A::new(-5.0, 0.0, -5.0),
            Vec3A::new(0.0, 0.0, 5.0),
            Vec3A::new(5.0, 0.0, -5.0),
        );
        // mark every edge internal: only near-face normals remain admissible
        let internal = tri.with_neighbor_normals([Some(tri.normal); 3]);
        let tri_kind = ShapeKind::Triangle(internal);
        let cube = ShapeKind::Box(BoxShape::with_size(1.0, 1.0, 1.0));

        // overlap from the side: MPR reports a lateral normal, which the
        // cone must reject
        let pair = pair_at(&cube, Vec3A::new(5.2, 0.0, -5.0), &tri_kind, Vec3A::ZERO);
        let mut arb = arbiter();
        update_contact(&mut arb, &pair, Vec3A::ZERO, 1.0 / 60.0, false, false);
        assert_eq!(arb.live_count(), 0);

        // a resting contact from above is aligned with the face and passes
        let pair = pair_at(&cube, Vec3A::new(0.0, 0.49, -1.0), &tri_kind, Vec3A::ZERO);
        let mut arb = arbiter();
        update_contact(&mut arb, &pair, Vec3A::ZERO, 1.0 / 60.0, false, false);
        assert!(arb.live_count() >= 1);
    }
}
