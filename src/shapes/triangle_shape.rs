use crate::linear_math::aabb::Aabb;
use glam::Vec3A;

/// One mesh triangle, body-local. Carries no mass; a triangle only makes
/// sense on a static body unless the caller overrides mass properties.
/// `neighbor_normals` are the face normals across each edge (v0v1, v1v2,
/// v2v0) when known, and widen the cone of contact normals the internal-edge
/// filter accepts.
#[derive(Clone, Copy, Debug)]
pub struct TriangleShape {
    pub vertices: [Vec3A; 3],
    pub normal: Vec3A,
    pub neighbor_normals: [Option<Vec3A>; 3],
}

impl TriangleShape {
    #[must_use]
    pub fn new(v0: Vec3A, v1: Vec3A, v2: Vec3A) -> Self {
        let normal = (v1 - v0).cross(v2 - v0).normalize_or(Vec3A::Y);
        Self {
            vertices: [v0, v1, v2],
            normal,
            neighbor_normals: [None; 3],
        }
    }

    #[must_use]
    pub const fn with_neighbor_normals(mut self, normals: [Option<Vec3A>; 3]) -> Self {
        self.neighbor_normals = normals;
        self
    }

    #[inline]
    #[must_use]
    pub fn local_support(&self, direction: Vec3A) -> Vec3A {
        let d0 = self.vertices[0].dot(direction);
        let d1 = self.vertices[1].dot(direction);
        let d2 = self.vertices[2].dot(direction);

        if d0 >= d1 && d0 >= d2 {
            self.vertices[0]
        } else if d1 >= d2 {
            self.vertices[1]
        } else {
            self.vertices[2]
        }
    }

    #[must_use]
    pub fn local_bounding_box(&self) -> Aabb {
        let [v0, v1, v2] = self.vertices;
        Aabb::new(v0.min(v1).min(v2), v0.max(v1).max(v2))
    }

    /// Lower bound on the alignment between an admissible contact normal and
    /// the face normal. Without neighbor data every normal passes; a
    /// coplanar neighbor marks its edge as internal and narrows the cone to
    /// near-face normals, while a sharply angled neighbor keeps it wide
    /// enough for genuine edge contacts.
    #[must_use]
    pub fn normal_cone_limit(&self) -> f32 {
        const EDGE_SLACK: f32 = 0.05;

        let limit = self
            .neighbor_normals
            .iter()
            .flatten()
            .map(|n| n.dot(self.normal) - EDGE_SLACK)
            .fold(f32::INFINITY, f32::min);

        if limit.is_finite() { limit } else { -1.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn support_selects_extreme_vertex() {
        let t = TriangleShape::new(
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, 3.0),
            Vec3A::new(2.0, 0.0, 0.0),
        );
        assert_eq!(t.local_support(Vec3A::X), Vec3A::new(2.0, 0.0, 0.0));
        assert_eq!(t.local_support(Vec3A::Z), Vec3A::new(0.0, 0.0, 3.0));
        assert_eq!(t.normal, Vec3A::Y);
    }

    #[test]
    fn coplanar_neighbors_tighten_cone() {
        let flat = TriangleShape::new(Vec3A::ZERO, Vec3A::X, Vec3A::Z);
        assert!(flat.normal_cone_limit() <= -1.0);

        let internal = flat.with_neighbor_normals([Some(flat.normal), None, None]);
        assert!(internal.normal_cone_limit() > 0.9);

        let feature = flat.with_neighbor_normals([
            Some(flat.normal),
            Some(Vec3A::new(0.0, 0.7, 0.7).normalize()),
            None,
        ]);
        assert!(feature.normal_cone_limit() < internal.normal_cone_limit());
    }
}
