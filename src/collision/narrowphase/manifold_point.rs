use glam::Vec3A;

/// One slot of a persistent manifold. Body-local anchors survive across
/// steps; world positions and separation are refreshed from the current
/// transforms. The accumulated impulses are the warm-start state.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContactPoint {
    pub local_a: Vec3A,
    pub local_b: Vec3A,
    pub world_a: Vec3A,
    pub world_b: Vec3A,
    /// World-space contact normal, from body B toward body A.
    pub normal: Vec3A,
    /// Signed separation along `normal`; negative while penetrating.
    pub distance: f32,
    pub normal_impulse: f32,
    pub tangent_impulse1: f32,
    pub tangent_impulse2: f32,
}

impl ContactPoint {
    #[must_use]
    pub fn new(local_a: Vec3A, local_b: Vec3A, normal: Vec3A, distance: f32) -> Self {
        Self {
            local_a,
            local_b,
            world_a: Vec3A::ZERO,
            world_b: Vec3A::ZERO,
            normal,
            distance,
            normal_impulse: 0.0,
            tangent_impulse1: 0.0,
            tangent_impulse2: 0.0,
        }
    }
}
