//! GJK closest-point query and EPA penetration depth, both running on the
//! same support mappings as MPR. GJK answers separated pairs (speculative
//! contacts need the gap and the closest features); EPA takes over when MPR
//! fails to converge or when the full-EPA switch is set.

use super::{ContactSurface, SupportPair, SupportVertex};
use arrayvec::ArrayVec;
use glam::Vec3A;

const GJK_TOLERANCE: f32 = 1e-6;
const MAX_GJK_ITERATIONS: u32 = 64;
const EPA_TOLERANCE: f32 = 1e-4;
const MAX_EPA_ITERATIONS: u32 = 64;
const MAX_EPA_FACES: usize = 128;

pub enum GjkResult {
    Separated(ContactSurface),
    Intersecting([SupportVertex; 4]),
    Failed,
}

/// Closest points between two convex shapes, or an origin-enclosing simplex
/// when they overlap.
pub fn closest_points(pair: &SupportPair) -> GjkResult {
    let mut simplex: ArrayVec<SupportVertex, 4> = ArrayVec::new();

    let first_dir = pair.center_offset().normalize_or(Vec3A::X);
    simplex.push(pair.support(first_dir));

    for _ in 0..MAX_GJK_ITERATIONS {
        let (closest, lambdas) = reduce_simplex(&mut simplex);

        if simplex.len() == 4 {
            // the tetrahedron encloses the origin
            let mut out = [SupportVertex::default(); 4];
            out.copy_from_slice(&simplex);
            return GjkResult::Intersecting(out);
        }

        let dist2 = closest.length_squared();
        if dist2 < GJK_TOLERANCE {
            // touching: inflate the simplex so EPA has a volume to work with
            return match inflate_to_tetrahedron(pair, &mut simplex) {
                Some(tetra) => GjkResult::Intersecting(tetra),
                None => GjkResult::Failed,
            };
        }

        let w = pair.support(-closest);
        if dist2 - closest.dot(w.w) <= GJK_TOLERANCE * dist2.max(1.0) {
            // no meaningful progress: converged on the separated distance
            return GjkResult::Separated(separated_surface(&simplex, &lambdas, closest));
        }

        if simplex.is_full() {
            return GjkResult::Failed;
        }
        simplex.push(w);
    }

    GjkResult::Failed
}

/// Penetration via GJK seeding and EPA expansion. Also answers separated
/// pairs so it can fully replace the MPR path.
pub fn penetration(pair: &SupportPair) -> Option<ContactSurface> {
    match closest_points(pair) {
        GjkResult::Separated(surface) => Some(surface),
        GjkResult::Intersecting(simplex) => expand_polytope(pair, simplex),
        GjkResult::Failed => None,
    }
}

fn separated_surface(
    simplex: &[SupportVertex],
    lambdas: &[f32; 4],
    closest: Vec3A,
) -> ContactSurface {
    let mut point_a = Vec3A::ZERO;
    let mut point_b = Vec3A::ZERO;
    for (v, &l) in simplex.iter().zip(lambdas) {
        point_a += v.a * l;
        point_b += v.b * l;
    }
    let distance = closest.length();
    ContactSurface {
        // closest = point_a - point_b, which points from B toward A
        normal: closest / distance,
        point_a,
        point_b,
        distance,
    }
}

/// Closest point to the origin on the simplex. Reduces the simplex to the
/// supporting feature and returns matching barycentric weights. A full
/// tetrahedron that contains the origin is left intact.
fn reduce_simplex(simplex: &mut ArrayVec<SupportVertex, 4>) -> (Vec3A, [f32; 4]) {
    match simplex.len() {
        1 => (simplex[0].w, [1.0, 0.0, 0.0, 0.0]),
        2 => {
            let (closest, keep, lambdas) = closest_on_segment(simplex[0].w, simplex[1].w);
            retain(simplex, keep);
            (closest, lambdas)
        }
        3 => {
            let (closest, keep, lambdas) =
                closest_on_triangle(simplex[0].w, simplex[1].w, simplex[2].w);
            retain(simplex, keep);
            (closest, lambdas)
        }
        _ => {
            let [a, b, c, d] = [simplex[0].w, simplex[1].w, simplex[2].w, simplex[3].w];
            if tetrahedron_contains_origin(a, b, c, d) {
                return (Vec3A::ZERO, [0.25; 4]);
            }

            // test the three faces that include the newest vertex plus the base
            let faces = [[0usize, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
            let mut best = f32::INFINITY;
            let mut best_closest = Vec3A::ZERO;
            let mut best_keep = 0u8;
            let mut best_lambdas = [0.0; 4];
            let mut best_face = [0usize; 3];

            for face in faces {
                let (closest, keep, lambdas) = closest_on_triangle(
                    simplex[face[0]].w,
                    simplex[face[1]].w,
                    simplex[face[2]].w,
                );
                let d2 = closest.length_squared();
                if d2 < best {
                    best = d2;
                    best_closest = closest;
                    best_keep = keep;
                    best_lambdas = lambdas;
                    best_face = face;
                }
            }

            // the helper already compacts its barycentrics to the kept
            // vertices, in face order
            let picked: ArrayVec<SupportVertex, 4> = best_face
                .iter()
                .enumerate()
                .filter(|&(slot, _)| best_keep & (1 << slot) != 0)
                .map(|(_, &i)| simplex[i])
                .collect();
            simplex.clear();
            simplex.extend(picked);
            (best_closest, best_lambdas)
        }
    }
}

fn retain(simplex: &mut ArrayVec<SupportVertex, 4>, keep: u8) {
    let mut slot = 0;
    simplex.retain(|_| {
        let kept = keep & (1 << slot) != 0;
        slot += 1;
        kept
    });
}

/// Returns (closest point, kept-vertex bitmask, compacted barycentrics).
fn closest_on_segment(a: Vec3A, b: Vec3A) -> (Vec3A, u8, [f32; 4]) {
    let ab = b - a;
    let denom = ab.length_squared();
    if denom < 1e-12 {
        return (a, 0b01, [1.0, 0.0, 0.0, 0.0]);
    }
    let t = (-a.dot(ab) / denom).clamp(0.0, 1.0);
    if t <= 0.0 {
        (a, 0b01, [1.0, 0.0, 0.0, 0.0])
    } else if t >= 1.0 {
        (b, 0b10, [1.0, 0.0, 0.0, 0.0])
    } else {
        (a + ab * t, 0b11, [1.0 - t, t, 0.0, 0.0])
    }
}

fn closest_on_triangle(a: Vec3A, b: Vec3A, c: Vec3A) -> (Vec3A, u8, [f32; 4]) {
    let ab = b - a;
    let ac = c - a;
    let ap = -a;

    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (a, 0b001, [1.0, 0.0, 0.0, 0.0]);
    }

    let bp = -b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (b, 0b010, [1.0, 0.0, 0.0, 0.0]);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let t = d1 / (d1 - d3);
        return (a + ab * t, 0b011, [1.0 - t, t, 0.0, 0.0]);
    }

    let cp = -c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (c, 0b100, [1.0, 0.0, 0.0, 0.0]);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let t = d2 / (d2 - d6);
        return (a + ac * t, 0b101, [1.0 - t, t, 0.0, 0.0]);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let t = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (b + (c - b) * t, 0b110, [1.0 - t, t, 0.0, 0.0]);
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    (a + ab * v + ac * w, 0b111, [1.0 - v - w, v, w, 0.0])
}

fn tetrahedron_contains_origin(a: Vec3A, b: Vec3A, c: Vec3A, d: Vec3A) -> bool {
    let same_side = |p0: Vec3A, p1: Vec3A, p2: Vec3A, opposite: Vec3A| {
        let n = (p1 - p0).cross(p2 - p0);
        let sign_opposite = n.dot(opposite - p0);
        let sign_origin = n.dot(-p0);
        sign_opposite * sign_origin >= 0.0
    };
    same_side(a, b, c, d) && same_side(a, b, d, c) && same_side(a, c, d, b) && same_side(b, c, d, a)
}

/// Grows a degenerate touching simplex into a tetrahedron around the origin
/// by probing the coordinate axes.
fn inflate_to_tetrahedron(
    pair: &SupportPair,
    simplex: &mut ArrayVec<SupportVertex, 4>,
) -> Option<[SupportVertex; 4]> {
    const PROBES: [Vec3A; 6] = [
        Vec3A::X,
        Vec3A::NEG_X,
        Vec3A::Y,
        Vec3A::NEG_Y,
        Vec3A::Z,
        Vec3A::NEG_Z,
    ];

    for dir in PROBES {
        if simplex.is_full() {
            break;
        }
        let w = pair.support(dir);
        let distinct = simplex
            .iter()
            .all(|v| (v.w - w.w).length_squared() > 1e-10);
        if distinct {
            simplex.push(w);
        }
    }

    if simplex.len() == 4 {
        let mut out = [SupportVertex::default(); 4];
        out.copy_from_slice(simplex);
        Some(out)
    } else {
        None
    }
}

struct Face {
    indices: [u32; 3],
    normal: Vec3A,
    dist: f32,
}

fn make_face(vertices: &[SupportVertex], i0: u32, i1: u32, i2: u32) -> Option<Face> {
    let a = vertices[i0 as usize].w;
    let b = vertices[i1 as usize].w;
    let c = vertices[i2 as usize].w;
    let normal = (b - a).cross(c - a).try_normalize()?;

    // orient outward; the polytope contains the origin
    let dist = normal.dot(a);
    if dist < 0.0 {
        Some(Face {
            indices: [i0, i2, i1],
            normal: -normal,
            dist: -dist,
        })
    } else {
        Some(Face {
            indices: [i0, i1, i2],
            normal,
            dist,
        })
    }
}

/// EPA: expands the origin-enclosing polytope until the closest face stops
/// moving, which is the penetration depth and normal.
fn expand_polytope(pair: &SupportPair, simplex: [SupportVertex; 4]) -> Option<ContactSurface> {
    let mut vertices: Vec<SupportVertex> = simplex.to_vec();
    let mut faces: Vec<Face> = Vec::with_capacity(MAX_EPA_FACES);

    for [i0, i1, i2] in [[0u32, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]] {
        faces.push(make_face(&vertices, i0, i1, i2)?);
    }

    for _ in 0..MAX_EPA_ITERATIONS {
        let closest = faces
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.dist.total_cmp(&b.dist))
            .map(|(i, _)| i)?;

        let normal = faces[closest].normal;
        let dist = faces[closest].dist;

        let w = pair.support(normal);
        let growth = normal.dot(w.w) - dist;
        if growth < EPA_TOLERANCE || faces.len() >= MAX_EPA_FACES {
            return Some(face_contact(&vertices, &faces[closest]));
        }

        // carve out every face visible from the new vertex and remember the
        // horizon edges left behind
        let new_index = vertices.len() as u32;
        vertices.push(w);

        let mut horizon: Vec<(u32, u32)> = Vec::new();
        let mut kept: Vec<Face> = Vec::new();
        for face in faces.drain(..) {
            let visible = face.normal.dot(w.w - vertices[face.indices[0] as usize].w) > 0.0;
            if !visible {
                kept.push(face);
                continue;
            }
            for k in 0..3 {
                let edge = (face.indices[k], face.indices[(k + 1) % 3]);
                if let Some(pos) = horizon.iter().position(|&(a, b)| (b, a) == edge) {
                    horizon.swap_remove(pos);
                } else {
                    horizon.push(edge);
                }
            }
        }
        faces = kept;

        for (a, b) in horizon {
            faces.push(make_face(&vertices, a, b, new_index)?);
        }
        if faces.is_empty() {
            return None;
        }
    }

    None
}

fn face_contact(vertices: &[SupportVertex], face: &Face) -> ContactSurface {
    let a = vertices[face.indices[0] as usize];
    let b = vertices[face.indices[1] as usize];
    let c = vertices[face.indices[2] as usize];

    // barycentric weights of the origin projection on the face
    let p = face.normal * face.dist;
    let v0 = b.w - a.w;
    let v1 = c.w - a.w;
    let v2 = p - a.w;
    let d00 = v0.dot(v0);
    let d01 = v0.dot(v1);
    let d11 = v1.dot(v1);
    let d20 = v2.dot(v0);
    let d21 = v2.dot(v1);
    let denom = d00 * d11 - d01 * d01;

    let (u, v, w) = if denom.abs() > 1e-12 {
        let v = (d11 * d20 - d01 * d21) / denom;
        let w = (d00 * d21 - d01 * d20) / denom;
        (1.0 - v - w, v, w)
    } else {
        (1.0, 0.0, 0.0)
    };

    let point_a = a.a * u + b.a * v + c.a * w;
    let point_b = a.b * u + b.b * v + c.b * w;

    ContactSurface {
        normal: -face.normal,
        point_a,
        point_b,
        distance: -face.dist,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::{BoxShape, ShapeKind, SphereShape};
    use glam::Mat3A;

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
    fn separated_spheres_distance() {
        let s = ShapeKind::Sphere(SphereShape::new(1.0));
        let pair = pair_at(&s, Vec3A::new(5.0, 0.0, 0.0), &s, Vec3A::ZERO);

        match closest_points(&pair) {
            GjkResult::Separated(c) => {
                assert!((c.distance - 3.0).abs() < 1e-3, "distance {}", c.distance);
                assert!(c.normal.x > 0.99);
                assert!((c.point_a - Vec3A::new(4.0, 0.0, 0.0)).length() < 1e-2);
                assert!((c.point_b - Vec3A::new(1.0, 0.0, 0.0)).length() < 1e-2);
            }
            _ => panic!("expected separation"),
        }
    }

    #[test]
    fn separated_boxes_axis_distance() {
        let b = ShapeKind::Box(BoxShape::with_size(1.0, 1.0, 1.0));
        let pair = pair_at(&b, Vec3A::new(0.0, 2.25, 0.0), &b, Vec3A::ZERO);

        match closest_points(&pair) {
            GjkResult::Separated(c) => {
                assert!((c.distance - 1.25).abs() < 1e-3);
                assert!(c.normal.y > 0.99);
            }
            _ => panic!("expected separation"),
        }
    }

    #[test]
    fn epa_depth_for_overlapping_boxes() {
        let b = ShapeKind::Box(BoxShape::with_size(1.0, 1.0, 1.0));
        let pair = pair_at(&b, Vec3A::new(0.0, 0.9, 0.0), &b, Vec3A::ZERO);

        let c = penetration(&pair).expect("overlap must resolve");
        assert!(c.distance < 0.0);
        assert!((c.distance + 0.1).abs() < 1e-2, "depth ~0.1, got {}", c.distance);
        assert!(c.normal.y.abs() > 0.99);
        // pushing A out of B means the normal points up here
        assert!(c.normal.y > 0.0);
    }

    #[test]
    fn epa_handles_deep_sphere_overlap() {
        let s = ShapeKind::Sphere(SphereShape::new(1.0));
        let pair = pair_at(&s, Vec3A::new(0.25, 0.0, 0.0), &s, Vec3A::ZERO);

        let c = penetration(&pair).expect("overlap must resolve");
        assert!((c.distance + 1.75).abs() < 0.05, "depth ~1.75, got {}", c.distance);
        assert!(c.normal.x > 0.9);
    }
}
