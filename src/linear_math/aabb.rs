use glam::{Mat3A, Vec3A};
use std::ops::{Add, AddAssign};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3A,
    pub max: Vec3A,
}

impl Aabb {
    pub const ZERO: Self = Self {
        min: Vec3A::ZERO,
        max: Vec3A::ZERO,
    };

    /// Inverted bounds; the identity for union.
    pub const EMPTY: Self = Self {
        min: Vec3A::INFINITY,
        max: Vec3A::NEG_INFINITY,
    };

    #[inline]
    #[must_use]
    pub const fn new(min: Vec3A, max: Vec3A) -> Self {
        Self { min, max }
    }

    #[inline]
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.min.cmple(other.min).all() && self.max.cmpge(other.max).all()
    }

    #[inline]
    #[must_use]
    pub fn center(&self) -> Vec3A {
        (self.min + self.max) * 0.5
    }

    #[inline]
    #[must_use]
    pub fn extents(&self) -> Vec3A {
        self.max - self.min
    }

    #[must_use]
    pub fn area(&self) -> f32 {
        let d = self.max - self.min;
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    #[inline]
    #[must_use]
    pub fn fattened(&self, margin: f32) -> Self {
        Self {
            min: self.min - margin,
            max: self.max + margin,
        }
    }

    /// Extends the box along `displacement`, used to cover a predicted sweep.
    #[must_use]
    pub fn swept(&self, displacement: Vec3A) -> Self {
        Self {
            min: self.min + displacement.min(Vec3A::ZERO),
            max: self.max + displacement.max(Vec3A::ZERO),
        }
    }

    /// Maps a local-space box through a rigid transform.
    #[must_use]
    pub fn transformed(&self, position: Vec3A, orientation: Mat3A) -> Self {
        let center = position + orientation * self.center();
        let extent = orientation.abs() * (self.extents() * 0.5);
        Self {
            min: center - extent,
            max: center + extent,
        }
    }

    /// Slab test against the ray `origin + t * direction`, `t` in `[0, max_t]`.
    /// `inv_direction` components may be infinite for axis-parallel rays.
    #[must_use]
    pub fn ray_intersects(&self, origin: Vec3A, inv_direction: Vec3A, max_t: f32) -> bool {
        let t1 = (self.min - origin) * inv_direction;
        let t2 = (self.max - origin) * inv_direction;
        let tmin = t1.min(t2).max_element().max(0.0);
        let tmax = t1.max(t2).min_element().min(max_t);
        tmin <= tmax
    }
}

impl Add for Aabb {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self {
            min: self.min.min(rhs.min),
            max: self.max.max(rhs.max),
        }
    }
}

impl AddAssign for Aabb {
    fn add_assign(&mut self, rhs: Self) {
        self.min = self.min.min(rhs.min);
        self.max = self.max.max(rhs.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_and_overlap() {
        let a = Aabb::new(Vec3A::ZERO, Vec3A::ONE);
        let b = Aabb::new(Vec3A::splat(0.5), Vec3A::splat(2.0));
        let c = Aabb::new(Vec3A::splat(3.0), Vec3A::splat(4.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));

        let u = a + c;
        assert!(u.contains(&a));
        assert!(u.contains(&c));
    }

    #[test]
    fn fatten_then_contain() {
        let tight = Aabb::new(Vec3A::ZERO, Vec3A::ONE);
        let fat = tight.fattened(0.1);
        assert!(fat.contains(&tight));
        assert!(!tight.contains(&fat));
    }

    #[test]
    fn ray_slab_hits_and_misses() {
        let b = Aabb::new(Vec3A::new(-1.0, -1.0, -1.0), Vec3A::new(1.0, 1.0, 1.0));
        let origin = Vec3A::new(-5.0, 0.0, 0.0);
        let inv = Vec3A::new(1.0, f32::INFINITY, f32::INFINITY);
        assert!(b.ray_intersects(origin, inv, 100.0));
        assert!(!b.ray_intersects(origin, inv, 3.0));

        let miss_origin = Vec3A::new(-5.0, 2.0, 0.0);
        assert!(!b.ray_intersects(miss_origin, inv, 100.0));
    }

    #[test]
    fn transformed_covers_rotated_box() {
        let local = Aabb::new(Vec3A::splat(-1.0), Vec3A::splat(1.0));
        let world = local.transformed(Vec3A::new(10.0, 0.0, 0.0), Mat3A::from_rotation_z(0.5));
        assert!(world.min.x < 9.0);
        assert!(world.max.x > 11.0);
        assert!((world.center() - Vec3A::new(10.0, 0.0, 0.0)).length() < 1e-6);
    }
}
