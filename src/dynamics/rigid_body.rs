use crate::collections::PoolItem;
use crate::handles::{BodyHandle, ConstraintHandle, ShapeHandle};
use crate::linear_math::Mat3AExt;
use glam::{Mat3A, Vec3A};

#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicU32, Ordering};

pub const BODY_ACTIVE: u8 = 1;
pub const BODY_STATIC: u8 = 1 << 1;

pub(crate) const NULL_ISLAND: u32 = u32::MAX;

/// Hot per-body record, pool-resident and touched by every solver inner
/// loop. Everything else about a body lives in the cold [`RigidBody`].
pub struct RigidBodyData {
    pub(crate) index: u32,
    pub position: Vec3A,
    pub orientation: Mat3A,
    pub linear_velocity: Vec3A,
    pub angular_velocity: Vec3A,
    /// Solver accumulators, folded into the velocities once per substep.
    pub delta_linear_velocity: Vec3A,
    pub delta_angular_velocity: Vec3A,
    pub inverse_mass: f32,
    pub inverse_inertia_world: Mat3A,
    pub inverse_inertia_local: Mat3A,
    pub flags: u8,
    /// Guards against two islands touching the same record; islands are
    /// disjoint so this never trips.
    #[cfg(debug_assertions)]
    lock: AtomicU32,
}

impl PoolItem for RigidBodyData {
    fn index(&self) -> u32 {
        self.index
    }
    fn set_index(&mut self, index: u32) {
        self.index = index;
    }
}

impl RigidBodyData {
    #[must_use]
    pub fn new() -> Self {
        Self {
            index: 0,
            position: Vec3A::ZERO,
            orientation: Mat3A::IDENTITY,
            linear_velocity: Vec3A::ZERO,
            angular_velocity: Vec3A::ZERO,
            delta_linear_velocity: Vec3A::ZERO,
            delta_angular_velocity: Vec3A::ZERO,
            inverse_mass: 1.0,
            inverse_inertia_world: Mat3A::IDENTITY,
            inverse_inertia_local: Mat3A::IDENTITY,
            flags: BODY_ACTIVE,
            #[cfg(debug_assertions)]
            lock: AtomicU32::new(0),
        }
    }

    /// Pinned infinite-mass stand-in the solver uses for the static side of
    /// a row.
    #[must_use]
    pub(crate) fn fixed() -> Self {
        let mut data = Self::new();
        data.inverse_mass = 0.0;
        data.inverse_inertia_world = Mat3A::ZERO;
        data.inverse_inertia_local = Mat3A::ZERO;
        data.flags = BODY_STATIC;
        data
    }

    #[inline]
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.flags & BODY_ACTIVE != 0
    }

    #[inline]
    #[must_use]
    pub const fn is_static(&self) -> bool {
        self.flags & BODY_STATIC != 0
    }

    #[inline]
    #[must_use]
    pub const fn is_static_or_inactive(&self) -> bool {
        !self.is_active() || self.is_static()
    }

    #[must_use]
    pub fn handle(&self) -> BodyHandle {
        BodyHandle(self.index)
    }

    /// Point velocity at a world offset from the center of mass.
    #[inline]
    #[must_use]
    pub fn velocity_at(&self, rel_pos: Vec3A) -> Vec3A {
        self.linear_velocity + self.angular_velocity.cross(rel_pos)
    }

    pub fn update_world_inertia(&mut self) {
        self.inverse_inertia_world =
            self.orientation * self.inverse_inertia_local * self.orientation.transpose();
    }

    pub(crate) fn set_mass_from(&mut self, mass: f32, inertia: Mat3A) {
        debug_assert!(mass > 0.0 && mass.is_finite());
        self.inverse_mass = 1.0 / mass;
        self.inverse_inertia_local = inertia.cofactor_inverse();
        self.update_world_inertia();
    }

    pub(crate) fn make_static(&mut self) {
        self.flags = (self.flags | BODY_STATIC) & !BODY_ACTIVE;
        self.inverse_mass = 0.0;
        self.inverse_inertia_local = Mat3A::ZERO;
        self.inverse_inertia_world = Mat3A::ZERO;
        self.linear_velocity = Vec3A::ZERO;
        self.angular_velocity = Vec3A::ZERO;
    }

    #[cfg(debug_assertions)]
    pub(crate) fn debug_lock(&self) {
        let taken = self.lock.compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed);
        assert!(taken.is_ok(), "body touched by two islands at once");
    }

    #[cfg(debug_assertions)]
    pub(crate) fn debug_unlock(&self) {
        self.lock.store(0, Ordering::Release);
    }

    #[cfg(not(debug_assertions))]
    #[inline]
    pub(crate) fn debug_lock(&self) {}

    #[cfg(not(debug_assertions))]
    #[inline]
    pub(crate) fn debug_unlock(&self) {}
}

impl Default for RigidBodyData {
    fn default() -> Self {
        Self::new()
    }
}

/// Cold owning wrapper: attachment lists, graph edges, sleeping bookkeeping
/// and material parameters. One per hot record, indexed by the same handle.
pub struct RigidBody {
    pub handle: BodyHandle,
    pub(crate) shapes: Vec<ShapeHandle>,
    /// Adjacent dynamic bodies with an edge multiplicity, so removing one of
    /// two parallel edges keeps the connection.
    pub(crate) connections: Vec<(BodyHandle, u32)>,
    pub(crate) contacts: Vec<u32>,
    pub(crate) constraints: Vec<ConstraintHandle>,
    pub(crate) island: u32,
    pub friction: f32,
    pub restitution: f32,
    /// Velocity retention per substep-scaled step; 1.0 disables damping.
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub force: Vec3A,
    pub torque: Vec3A,
    pub(crate) sleep_time: f32,
    pub sleep_linear_threshold_sq: f32,
    pub sleep_angular_threshold_sq: f32,
    pub deactivation_time: f32,
    pub affected_by_gravity: bool,
    pub enable_speculative_contacts: bool,
}

impl RigidBody {
    #[must_use]
    pub fn new(handle: BodyHandle, island: u32) -> Self {
        Self {
            handle,
            shapes: Vec::new(),
            connections: Vec::new(),
            contacts: Vec::new(),
            constraints: Vec::new(),
            island,
            friction: 0.5,
            restitution: 0.0,
            linear_damping: 0.998,
            angular_damping: 0.995,
            force: Vec3A::ZERO,
            torque: Vec3A::ZERO,
            sleep_time: 0.0,
            sleep_linear_threshold_sq: 0.01,
            sleep_angular_threshold_sq: 0.0225,
            deactivation_time: 0.5,
            affected_by_gravity: true,
            enable_speculative_contacts: false,
        }
    }

    #[must_use]
    pub fn shapes(&self) -> &[ShapeHandle] {
        &self.shapes
    }

    #[must_use]
    pub fn constraints(&self) -> &[ConstraintHandle] {
        &self.constraints
    }

    /// Handles of the live arbiters touching this body.
    #[must_use]
    pub fn contacts(&self) -> &[u32] {
        &self.contacts
    }

    #[must_use]
    pub fn island_id(&self) -> Option<u32> {
        (self.island != NULL_ISLAND).then_some(self.island)
    }

    pub(crate) fn add_connection(&mut self, other: BodyHandle) {
        if let Some(entry) = self.connections.iter_mut().find(|(b, _)| *b == other) {
            entry.1 += 1;
        } else {
            self.connections.push((other, 1));
        }
    }

    pub(crate) fn remove_connection(&mut self, other: BodyHandle) {
        if let Some(pos) = self.connections.iter().position(|(b, _)| *b == other) {
            self.connections[pos].1 -= 1;
            if self.connections[pos].1 == 0 {
                self.connections.swap_remove(pos);
            }
        }
    }

    pub(crate) fn clear_forces(&mut self) {
        self.force = Vec3A::ZERO;
        self.torque = Vec3A::ZERO;
    }
}
