use super::MassProperties;
use crate::linear_math::aabb::Aabb;
use glam::{Mat3A, Vec3, Vec3A};
use std::f32::consts::PI;

#[derive(Clone, Copy, Debug)]
pub struct SphereShape {
    pub radius: f32,
}

impl SphereShape {
    #[must_use]
    pub const fn new(radius: f32) -> Self {
        Self { radius }
    }

    #[inline]
    #[must_use]
    pub fn local_support(&self, direction: Vec3A) -> Vec3A {
        let d = direction.normalize_or(Vec3A::X);
        d * self.radius
    }

    #[must_use]
    pub fn local_bounding_box(&self) -> Aabb {
        Aabb::new(Vec3A::splat(-self.radius), Vec3A::splat(self.radius))
    }

    #[must_use]
    pub fn mass_properties(&self) -> MassProperties {
        let r = self.radius;
        let mass = 4.0 / 3.0 * PI * r * r * r;
        let i = 0.4 * mass * r * r;
        MassProperties {
            mass,
            inertia: Mat3A::from_diagonal(Vec3::splat(i)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn support_is_on_surface() {
        let s = SphereShape::new(2.0);
        let p = s.local_support(Vec3A::new(0.0, 3.0, 4.0));
        assert!((p.length() - 2.0).abs() < 1e-6);
        assert!(p.y > 0.0 && p.z > 0.0);
    }

    #[test]
    fn degenerate_direction_falls_back() {
        let s = SphereShape::new(1.0);
        let p = s.local_support(Vec3A::ZERO);
        assert!((p.length() - 1.0).abs() < 1e-6);
    }
}
