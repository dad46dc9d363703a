use super::MassProperties;
use crate::linear_math::aabb::Aabb;
use glam::{Mat3A, Vec3, Vec3A};
use std::f32::consts::PI;

/// Capsule along the local Y axis: a cylinder of half length `half_height`
/// capped by hemispheres of `radius`.
#[derive(Clone, Copy, Debug)]
pub struct CapsuleShape {
    pub radius: f32,
    pub half_height: f32,
}

impl CapsuleShape {
    #[must_use]
    pub const fn new(radius: f32, half_height: f32) -> Self {
        Self {
            radius,
            half_height,
        }
    }

    #[inline]
    #[must_use]
    pub fn local_support(&self, direction: Vec3A) -> Vec3A {
        let d = direction.normalize_or(Vec3A::X);
        let cap = Vec3A::new(0.0, self.half_height.copysign(direction.y), 0.0);
        cap + d * self.radius
    }

    #[must_use]
    pub fn local_bounding_box(&self) -> Aabb {
        let r = self.radius;
        let e = Vec3A::new(r, self.half_height + r, r);
        Aabb::new(-e, e)
    }

    #[must_use]
    pub fn mass_properties(&self) -> MassProperties {
        let r = self.radius;
        let l = 2.0 * self.half_height;

        let cylinder_mass = PI * r * r * l;
        let sphere_mass = 4.0 / 3.0 * PI * r * r * r;
        let mass = cylinder_mass + sphere_mass;

        let axial = 0.5 * cylinder_mass * r * r + 0.4 * sphere_mass * r * r;
        let lateral = cylinder_mass * (l * l / 12.0 + r * r / 4.0)
            + sphere_mass * (0.4 * r * r + l * l / 4.0 + 0.375 * l * r);

        MassProperties {
            mass,
            inertia: Mat3A::from_diagonal(Vec3::new(lateral, axial, lateral)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn support_reaches_cap_tips() {
        let c = CapsuleShape::new(0.5, 1.0);
        let top = c.local_support(Vec3A::Y);
        assert!((top - Vec3A::new(0.0, 1.5, 0.0)).length() < 1e-6);
        let bottom = c.local_support(Vec3A::NEG_Y);
        assert!((bottom - Vec3A::new(0.0, -1.5, 0.0)).length() < 1e-6);
    }

    #[test]
    fn mass_exceeds_inner_cylinder() {
        let c = CapsuleShape::new(0.5, 1.0);
        let mp = c.mass_properties();
        let cylinder = PI * 0.25 * 2.0;
        assert!(mp.mass > cylinder);
        assert!(mp.inertia.x_axis.x > mp.inertia.y_axis.y);
    }
}
