use crate::handles::{BodyHandle, ShapeHandle};
use crate::linear_math::aabb::Aabb;
use glam::{Mat3A, Vec3A};

pub mod box_shape;
pub mod capsule_shape;
pub mod sphere_shape;
pub mod triangle_shape;

pub use box_shape::BoxShape;
pub use capsule_shape::CapsuleShape;
pub use sphere_shape::SphereShape;
pub use triangle_shape::TriangleShape;

/// Mass and inertia about the shape origin for unit density.
#[derive(Clone, Copy, Debug)]
pub struct MassProperties {
    pub mass: f32,
    pub inertia: Mat3A,
}

impl MassProperties {
    pub const ZERO: Self = Self {
        mass: 0.0,
        inertia: Mat3A::ZERO,
    };
}

/// Closed set of convex shapes. The narrowphase only ever calls the support
/// mapping; everything else is bookkeeping for mass and bounds.
#[derive(Clone, Debug)]
pub enum ShapeKind {
    Box(BoxShape),
    Sphere(SphereShape),
    Capsule(CapsuleShape),
    Triangle(TriangleShape),
}

impl ShapeKind {
    /// Farthest point of the shape along `direction`, in shape-local space.
    #[must_use]
    pub fn local_support(&self, direction: Vec3A) -> Vec3A {
        match self {
            Self::Box(s) => s.local_support(direction),
            Self::Sphere(s) => s.local_support(direction),
            Self::Capsule(s) => s.local_support(direction),
            Self::Triangle(s) => s.local_support(direction),
        }
    }

    #[must_use]
    pub fn local_bounding_box(&self) -> Aabb {
        match self {
            Self::Box(s) => s.local_bounding_box(),
            Self::Sphere(s) => s.local_bounding_box(),
            Self::Capsule(s) => s.local_bounding_box(),
            Self::Triangle(s) => s.local_bounding_box(),
        }
    }

    #[must_use]
    pub fn mass_properties(&self) -> MassProperties {
        match self {
            Self::Box(s) => s.mass_properties(),
            Self::Sphere(s) => s.mass_properties(),
            Self::Capsule(s) => s.mass_properties(),
            Self::Triangle(_) => MassProperties::ZERO,
        }
    }

    #[must_use]
    pub const fn as_triangle(&self) -> Option<&TriangleShape> {
        match self {
            Self::Triangle(s) => Some(s),
            _ => None,
        }
    }
}

/// A shape instance registered with the world: the convex geometry plus its
/// attachment and broadphase bookkeeping.
pub struct Shape {
    pub handle: ShapeHandle,
    pub kind: ShapeKind,
    pub body: Option<BodyHandle>,
    pub local_aabb: Aabb,
    pub world_aabb: Aabb,
    pub(crate) proxy: Option<u32>,
}

impl Shape {
    #[must_use]
    pub fn new(handle: ShapeHandle, kind: ShapeKind) -> Self {
        let local_aabb = kind.local_bounding_box();
        Self {
            handle,
            kind,
            body: None,
            local_aabb,
            world_aabb: local_aabb,
            proxy: None,
        }
    }

    pub fn update_world_bounding_box(&mut self, position: Vec3A, orientation: Mat3A) {
        self.world_aabb = self.local_aabb.transformed(position, orientation);
    }

    /// Support mapping in world space for the owning body's transform.
    #[must_use]
    pub fn support(&self, position: Vec3A, orientation: Mat3A, direction: Vec3A) -> Vec3A {
        position + orientation * self.kind.local_support(orientation.transpose() * direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn support_points_stay_inside_bounds() {
        let kinds = [
            ShapeKind::Box(BoxShape::new(Vec3A::new(0.5, 1.0, 2.0))),
            ShapeKind::Sphere(SphereShape::new(0.7)),
            ShapeKind::Capsule(CapsuleShape::new(0.3, 0.6)),
        ];
        let dirs = [
            Vec3A::X,
            Vec3A::NEG_Y,
            Vec3A::new(1.0, 1.0, 1.0).normalize(),
            Vec3A::new(-0.2, 0.9, -0.4).normalize(),
        ];
        for kind in &kinds {
            let bounds = kind.local_bounding_box();
            for dir in dirs {
                let p = kind.local_support(dir);
                assert!(p.cmpge(bounds.min - 1e-5).all());
                assert!(p.cmple(bounds.max + 1e-5).all());
            }
        }
    }

    #[test]
    fn world_support_follows_transform() {
        let shape = Shape::new(ShapeHandle(0), ShapeKind::Box(BoxShape::new(Vec3A::splat(1.0))));
        let position = Vec3A::new(5.0, 0.0, 0.0);
        let p = shape.support(position, Mat3A::IDENTITY, Vec3A::X);
        assert!((p - Vec3A::new(6.0, 1.0, 1.0)).length() < 1e-6);

        let quarter = Mat3A::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let p = shape.support(position, quarter, Vec3A::X);
        assert!((p.x - 6.0).abs() < 1e-5);
    }
}
