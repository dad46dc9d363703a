use super::MassProperties;
use crate::linear_math::aabb::Aabb;
use glam::{Mat3A, Vec3, Vec3A};

#[derive(Clone, Copy, Debug)]
pub struct BoxShape {
    pub half_extents: Vec3A,
}

impl BoxShape {
    #[must_use]
    pub const fn new(half_extents: Vec3A) -> Self {
        Self { half_extents }
    }

    #[must_use]
    pub fn with_size(x: f32, y: f32, z: f32) -> Self {
        Self {
            half_extents: Vec3A::new(x, y, z) * 0.5,
        }
    }

    #[inline]
    #[must_use]
    pub fn local_support(&self, direction: Vec3A) -> Vec3A {
        Vec3A::select(
            direction.cmpge(Vec3A::ZERO),
            self.half_extents,
            -self.half_extents,
        )
    }

    #[must_use]
    pub fn local_bounding_box(&self) -> Aabb {
        Aabb::new(-self.half_extents, self.half_extents)
    }

    #[must_use]
    pub fn mass_properties(&self) -> MassProperties {
        let h = self.half_extents;
        let mass = 8.0 * h.x * h.y * h.z;
        let k = mass / 3.0;
        MassProperties {
            mass,
            inertia: Mat3A::from_diagonal(Vec3::new(
                k * (h.y * h.y + h.z * h.z),
                k * (h.x * h.x + h.z * h.z),
                k * (h.x * h.x + h.y * h.y),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn support_picks_corners() {
        let b = BoxShape::new(Vec3A::new(1.0, 2.0, 3.0));
        let p = b.local_support(Vec3A::new(0.1, -0.5, 0.2));
        assert_eq!(p, Vec3A::new(1.0, -2.0, 3.0));
    }

    #[test]
    fn unit_cube_mass() {
        let b = BoxShape::with_size(1.0, 1.0, 1.0);
        let mp = b.mass_properties();
        assert!((mp.mass - 1.0).abs() < 1e-6);
        // 1/12 (1 + 1) for the unit cube
        assert!((mp.inertia.x_axis.x - 1.0 / 6.0).abs() < 1e-6);
    }
}
