use glam::{Mat3A, Quat, Vec3A};
use std::f32::consts::FRAC_PI_4;

/// Rotating more than this per step is clamped; exponential-map accuracy
/// degrades past it.
const ANGULAR_MOTION_THRESHOLD: f32 = FRAC_PI_4;

/// Advances an orientation by `ang_vel` over `time_step` using the
/// exponential map, renormalized through a quaternion.
#[must_use]
pub fn integrate_orientation(orientation: Mat3A, ang_vel: Vec3A, time_step: f32) -> Mat3A {
    let mut angle = ang_vel.length();

    if angle * time_step > ANGULAR_MOTION_THRESHOLD {
        angle = ANGULAR_MOTION_THRESHOLD / time_step;
    }

    // Taylor expansion of sin(a t / 2) / a near zero.
    let axis = if angle < 0.001 {
        ang_vel * (0.5 * time_step - time_step * time_step * time_step * 0.020833334 * angle * angle)
    } else {
        ang_vel * ((0.5 * angle * time_step).sin() / angle)
    };

    let dorn = Quat::from_xyzw(axis.x, axis.y, axis.z, (angle * time_step * 0.5).cos());
    let orn0 = Quat::from_mat3a(&orientation);
    Mat3A::from_quat((dorn * orn0).normalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_orthonormal(m: Mat3A) -> bool {
        let id = m * m.transpose();
        (0..3).all(|c| {
            (0..3).all(|r| {
                let expect = if c == r { 1.0 } else { 0.0 };
                (id.col(c)[r] - expect).abs() < 1e-5
            })
        })
    }

    #[test]
    fn quarter_turn_about_y() {
        let mut m = Mat3A::IDENTITY;
        let w = Vec3A::new(0.0, std::f32::consts::FRAC_PI_2, 0.0);
        // 100 small steps summing to one second
        for _ in 0..100 {
            m = integrate_orientation(m, w, 0.01);
        }
        let rotated = m * Vec3A::X;
        assert!((rotated - Vec3A::new(0.0, 0.0, -1.0)).length() < 1e-2);
        assert!(is_orthonormal(m));
    }

    #[test]
    fn large_rates_stay_orthonormal() {
        let mut m = Mat3A::IDENTITY;
        let w = Vec3A::new(300.0, -200.0, 100.0);
        for _ in 0..60 {
            m = integrate_orientation(m, w, 1.0 / 60.0);
        }
        assert!(is_orthonormal(m));
    }

    #[test]
    fn zero_rate_is_identity() {
        let m = Mat3A::from_rotation_x(0.4);
        let out = integrate_orientation(m, Vec3A::ZERO, 1.0 / 60.0);
        assert!((out.x_axis - m.x_axis).length() < 1e-6);
        assert!((out.y_axis - m.y_axis).length() < 1e-6);
    }
}
