use glam::{Mat3A, Quat, Vec3A};
use std::f32::consts::FRAC_1_SQRT_2;

pub mod aabb;
pub mod transform_util;

pub const LARGE_FLOAT: f32 = 1e18;

pub trait Mat3AExt {
    fn cofac(&self, r1: usize, c1: usize, r2: usize, c2: usize) -> f32;
    fn cofactor_inverse(&self) -> Self;
}

impl Mat3AExt for Mat3A {
    fn cofac(&self, r1: usize, c1: usize, r2: usize, c2: usize) -> f32 {
        self.col(r1)[c1] * self.col(r2)[c2] - self.col(r1)[c2] * self.col(r2)[c1]
    }

    fn cofactor_inverse(&self) -> Self {
        let co = Vec3A::new(
            self.cofac(1, 1, 2, 2),
            self.cofac(1, 2, 2, 0),
            self.cofac(1, 0, 2, 1),
        );
        let det = self.x_axis.dot(co);
        debug_assert_ne!(det, 0.0);
        let s = Vec3A::splat(det.recip());

        Self::from_cols(
            co * s,
            Vec3A::new(
                self.cofac(0, 2, 2, 1),
                self.cofac(0, 0, 2, 2),
                self.cofac(0, 1, 2, 0),
            ) * s,
            Vec3A::new(
                self.cofac(0, 1, 1, 2),
                self.cofac(0, 2, 1, 0),
                self.cofac(0, 0, 1, 1),
            ) * s,
        )
    }
}

/// Two unit tangents spanning the plane orthogonal to `n` (`n` must be unit).
pub fn plane_space(n: Vec3A) -> (Vec3A, Vec3A) {
    if n.z.abs() > FRAC_1_SQRT_2 {
        // choose p in y-z plane
        let a = n.y.mul_add(n.y, n.z * n.z);
        let k = 1. / a.sqrt();
        let p = Vec3A::new(0., -n.z * k, n.y * k);
        (p, Vec3A::new(a * k, -n.x * p.z, n.x * p.y))
    } else {
        // choose p in x-y plane
        let a = n.x.mul_add(n.x, n.y * n.y);
        let k = 1. / a.sqrt();
        let p = Vec3A::new(-n.y * k, n.x * k, 0.);
        (p, Vec3A::new(-n.z * p.y, n.z * p.x, a * k))
    }
}

/// Snaps a drifted rotation matrix back onto SO(3) through its quaternion.
pub fn orthonormalize(m: Mat3A) -> Mat3A {
    Mat3A::from_quat(Quat::from_mat3a(&m).normalize())
}

/// Transforms a world-space point into the frame given by `position`/`orientation`.
#[inline]
pub fn inverse_transform_point(position: Vec3A, orientation: Mat3A, point: Vec3A) -> Vec3A {
    orientation.transpose() * (point - position)
}

#[inline]
pub fn transform_point(position: Vec3A, orientation: Mat3A, point: Vec3A) -> Vec3A {
    position + orientation * point
}
