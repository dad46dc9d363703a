use crate::shapes::ShapeKind;
use glam::{Mat3A, Vec3A};

pub mod arbiter;
pub mod convex_driver;
pub mod gjk_epa;
pub mod manifold_point;
pub mod mpr;

pub use arbiter::{ArbiterKey, ContactData};
pub use manifold_point::ContactPoint;

/// Contacts are dropped once their separation or tangential drift exceeds
/// this.
pub const CONTACT_BREAKING_THRESHOLD: f32 = 0.02;

/// One point of the closest/deepest feature between two convex shapes.
/// `normal` points from shape B toward shape A; `distance` is the signed
/// separation along it, negative while penetrating. In every case
/// `point_a - point_b ≈ distance * normal`.
#[derive(Clone, Copy, Debug)]
pub struct ContactSurface {
    pub normal: Vec3A,
    pub point_a: Vec3A,
    pub point_b: Vec3A,
    pub distance: f32,
}

/// A support-mapped shape pair in world space; the only view of geometry the
/// narrowphase algorithms get.
pub struct SupportPair<'a> {
    pub shape_a: &'a ShapeKind,
    pub pos_a: Vec3A,
    pub orn_a: Mat3A,
    pub shape_b: &'a ShapeKind,
    pub pos_b: Vec3A,
    pub orn_b: Mat3A,
}

impl SupportPair<'_> {
    #[inline]
    #[must_use]
    pub fn support_a(&self, direction: Vec3A) -> Vec3A {
        self.pos_a + self.orn_a * self.shape_a.local_support(self.orn_a.transpose() * direction)
    }

    #[inline]
    #[must_use]
    pub fn support_b(&self, direction: Vec3A) -> Vec3A {
        self.pos_b + self.orn_b * self.shape_b.local_support(self.orn_b.transpose() * direction)
    }

    /// Support of the Minkowski difference A − B along `direction`, with the
    /// two witness points it came from.
    #[inline]
    #[must_use]
    pub fn support(&self, direction: Vec3A) -> SupportVertex {
        let a = self.support_a(direction);
        let b = self.support_b(-direction);
        SupportVertex { w: a - b, a, b }
    }

    #[inline]
    #[must_use]
    pub fn center_offset(&self) -> Vec3A {
        self.pos_a - self.pos_b
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SupportVertex {
    pub w: Vec3A,
    pub a: Vec3A,
    pub b: Vec3A,
}
