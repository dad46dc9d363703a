//! Minkowski portal refinement over support mappings. Finds the surface of
//! the Minkowski difference along the ray from an interior point through the
//! origin; the refined portal yields the contact normal, witness points and
//! penetration depth.

use super::{ContactSurface, SupportPair, SupportVertex};
use glam::Vec3A;

pub enum MprResult {
    Penetrating(ContactSurface),
    Separated,
    /// Portal refinement ran out of iterations; the caller should fall back
    /// to EPA.
    NotConverged,
}

const TOLERANCE: f32 = 1e-4;
const MAX_DISCOVERY_ITERATIONS: u32 = 32;
const MAX_REFINEMENT_ITERATIONS: u32 = 48;

pub fn penetration(pair: &SupportPair) -> MprResult {
    // interior point of the difference
    let mut v0 = pair.center_offset();
    if v0.length_squared() < 1e-10 {
        v0 = Vec3A::new(1e-4, 0.0, 0.0);
    }

    let mut dir = -v0;
    let mut v1 = pair.support(dir);
    if v1.w.dot(dir) <= 0.0 {
        return MprResult::Separated;
    }

    dir = v1.w.cross(v0);
    if dir.length_squared() < 1e-10 {
        // origin on the interior ray; the supports are collinear with it
        let normal = v1.w.normalize_or(Vec3A::X);
        return MprResult::Penetrating(ContactSurface {
            normal: -normal,
            point_a: v1.a,
            point_b: v1.b,
            distance: -v1.w.dot(normal),
        });
    }

    let mut v2 = pair.support(dir);
    if v2.w.dot(dir) <= 0.0 {
        return MprResult::Separated;
    }

    dir = (v1.w - v0).cross(v2.w - v0);
    if dir.dot(v0) > 0.0 {
        std::mem::swap(&mut v1, &mut v2);
        dir = -dir;
    }

    // discovery: rotate the candidate portal until the origin ray pierces it
    let mut v3;
    let mut iterations = 0;
    loop {
        iterations += 1;
        if iterations > MAX_DISCOVERY_ITERATIONS {
            return MprResult::NotConverged;
        }

        v3 = pair.support(dir);
        if v3.w.dot(dir) <= 0.0 {
            return MprResult::Separated;
        }

        if v1.w.cross(v3.w).dot(v0) < 0.0 {
            v2 = v3;
            dir = (v1.w - v0).cross(v3.w - v0);
            continue;
        }
        if v3.w.cross(v2.w).dot(v0) < 0.0 {
            v1 = v3;
            dir = (v3.w - v0).cross(v2.w - v0);
            continue;
        }
        break;
    }

    // refinement: push the portal to the surface
    let mut hit = false;
    let mut iterations = 0;
    loop {
        iterations += 1;

        let normal = (v2.w - v1.w)
            .cross(v3.w - v1.w)
            .try_normalize()
            .unwrap_or_else(|| (-v0).normalize_or(Vec3A::X));
        if normal.dot(v1.w) >= 0.0 {
            hit = true;
        }

        let v4 = pair.support(normal);
        let delta = (v4.w - v3.w).dot(normal);

        if delta <= TOLERANCE || iterations > MAX_REFINEMENT_ITERATIONS {
            if !hit {
                return if iterations > MAX_REFINEMENT_ITERATIONS {
                    MprResult::NotConverged
                } else {
                    MprResult::Separated
                };
            }
            return MprResult::Penetrating(portal_contact(v0, &v1, &v2, &v3, normal, pair));
        }

        // keep the sub-portal still pierced by the origin ray
        if v4.w.cross(v1.w).dot(v0) < 0.0 {
            if v4.w.cross(v2.w).dot(v0) < 0.0 {
                v1 = v4;
            } else {
                v3 = v4;
            }
        } else if v4.w.cross(v3.w).dot(v0) < 0.0 {
            v2 = v4;
        } else {
            v1 = v4;
        }
    }
}

/// Barycentric blend of the portal witnesses at the origin, weighted through
/// the interior tetrahedron (v0, v1, v2, v3).
fn portal_contact(
    v0: Vec3A,
    v1: &SupportVertex,
    v2: &SupportVertex,
    v3: &SupportVertex,
    normal: Vec3A,
    pair: &SupportPair,
) -> ContactSurface {
    let mut b0 = v1.w.cross(v2.w).dot(v3.w);
    let mut b1 = v3.w.cross(v2.w).dot(v0);
    let mut b2 = v0.cross(v1.w).dot(v3.w);
    let mut b3 = v2.w.cross(v1.w).dot(v0);
    let mut sum = b0 + b1 + b2 + b3;

    if sum <= 0.0 {
        b0 = 0.0;
        b1 = v2.w.cross(v3.w).dot(normal);
        b2 = v3.w.cross(v1.w).dot(normal);
        b3 = v1.w.cross(v2.w).dot(normal);
        sum = b1 + b2 + b3;
    }

    let inv = 1.0 / sum;
    let depth = normal.dot(v1.w).max(0.0);
    let contact_normal = -normal;
    let distance = -depth;

    // the blend lands on one shared point (the weights reproduce the
    // origin); reconstruct A's witness by the signed separation so the
    // body-local anchors keep the penetration across refreshes
    let point_b = (pair.pos_b * b0 + v1.b * b1 + v2.b * b2 + v3.b * b3) * inv;
    let point_a = point_b + contact_normal * distance;

    ContactSurface {
        normal: contact_normal,
        point_a,
        point_b,
        distance,
    }
}
