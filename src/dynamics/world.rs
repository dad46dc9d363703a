//! World state and the per-step pipeline: integrate forces, sync the
//! broadphase, refresh contacts, repartition islands, run the substepped
//! sequential-impulse solver, then damping, sleeping and force cleanup.

use crate::collections::{ActivePool, RawAccess};
use crate::collections::active_pool::PoolAccess;
use crate::collision::broadphase::{AABB_MARGIN, DynamicAabbTree};
use crate::collision::narrowphase::arbiter::{ArbiterKey, ContactData};
use crate::collision::narrowphase::{SupportPair, convex_driver};
use crate::dynamics::constraint_solver::{
    self, NO_NORMAL_ROW, RowSource, SOLVER_FIXED, SolverSettings, sanitize,
};
use crate::dynamics::constraint_solver::solver_row::ContactRowKind;
use crate::dynamics::constraints::{Constraint, ConstraintData};
use crate::dynamics::island::{Island, Islands};
use crate::dynamics::rigid_body::{NULL_ISLAND, RigidBody, RigidBodyData};
use crate::error::PhysicsError;
use crate::handles::{BodyHandle, ConstraintHandle, ShapeHandle};
use crate::linear_math::transform_util::integrate_orientation;
use crate::shapes::{Shape, ShapeKind};
use ahash::AHashMap;
use glam::Vec3A;
use log::{debug, trace, warn};
use rayon::prelude::*;

/// Worker idling policy. `Persistent` builds the pool up front and keeps it
/// warm for the world's lifetime; `Regular` builds it lazily on the first
/// multi-threaded step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ThreadModel {
    #[default]
    Regular,
    Persistent,
}

#[derive(Clone, Copy, Debug)]
pub struct WorldConfiguration {
    pub gravity: Vec3A,
    pub solver_iterations: u32,
    pub num_substeps: u32,
    pub allow_deactivation: bool,
    pub use_full_epa_solver: bool,
    pub thread_model: ThreadModel,
    /// Pool capacities, fixed at construction.
    pub num_bodies: usize,
    pub num_contacts: usize,
    pub num_constraints: usize,
}

impl Default for WorldConfiguration {
    fn default() -> Self {
        Self {
            gravity: Vec3A::new(0.0, -9.81, 0.0),
            solver_iterations: 8,
            num_substeps: 1,
            allow_deactivation: true,
            use_full_epa_solver: false,
            thread_model: ThreadModel::Regular,
            num_bodies: 4096,
            num_contacts: 16384,
            num_constraints: 1024,
        }
    }
}

impl WorldConfiguration {
    fn validate(&self) -> Result<(), PhysicsError> {
        if self.solver_iterations < 1 {
            return Err(PhysicsError::InvalidArgument {
                reason: "solver_iterations must be at least 1",
            });
        }
        if self.num_substeps < 1 {
            return Err(PhysicsError::InvalidArgument {
                reason: "num_substeps must be at least 1",
            });
        }
        if !self.gravity.is_finite() {
            return Err(PhysicsError::InvalidArgument {
                reason: "gravity must be finite",
            });
        }
        if self.num_bodies == 0 || self.num_contacts == 0 {
            return Err(PhysicsError::InvalidArgument {
                reason: "pool capacities must be nonzero",
            });
        }
        Ok(())
    }
}

struct ConstraintEntry {
    implementation: Box<dyn Constraint>,
    data: ConstraintData,
}

pub struct World {
    gravity: Vec3A,
    solver_iterations: u32,
    num_substeps: u32,
    allow_deactivation: bool,
    use_full_epa_solver: bool,
    settings: SolverSettings,

    body_data: ActivePool<RigidBodyData>,
    bodies: Vec<Option<RigidBody>>,
    shapes: Vec<Option<Shape>>,
    free_shapes: Vec<u32>,
    arbiters: ActivePool<ContactData>,
    arbiter_map: AHashMap<ArbiterKey, u32>,
    constraints: Vec<Option<ConstraintEntry>>,
    free_constraints: Vec<u32>,
    constraint_capacity: usize,
    constraint_count: usize,
    islands: Islands,
    tree: DynamicAabbTree,

    moved_scratch: Vec<u32>,
    pair_scratch: Vec<(u32, u32)>,
    broken_scratch: Vec<u32>,
    split_scratch: Vec<u32>,

    thread_pool: Option<rayon::ThreadPool>,
    null_body: BodyHandle,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("gravity", &self.gravity)
            .field("solver_iterations", &self.solver_iterations)
            .field("num_substeps", &self.num_substeps)
            .field("allow_deactivation", &self.allow_deactivation)
            .field("use_full_epa_solver", &self.use_full_epa_solver)
            .finish_non_exhaustive()
    }
}

impl World {
    pub fn new(config: WorldConfiguration) -> Result<Self, PhysicsError> {
        config.validate()?;

        // one extra slot so the anchor body does not eat user capacity
        let body_capacity = config.num_bodies + 1;

        let mut world = Self {
            gravity: config.gravity,
            solver_iterations: config.solver_iterations,
            num_substeps: config.num_substeps,
            allow_deactivation: config.allow_deactivation,
            use_full_epa_solver: config.use_full_epa_solver,
            settings: SolverSettings::default(),
            body_data: ActivePool::new("bodies", body_capacity),
            bodies: Vec::with_capacity(body_capacity),
            shapes: Vec::new(),
            free_shapes: Vec::new(),
            arbiters: ActivePool::new("contacts", config.num_contacts),
            arbiter_map: AHashMap::with_capacity(config.num_contacts),
            constraints: Vec::new(),
            free_constraints: Vec::new(),
            constraint_capacity: config.num_constraints,
            constraint_count: 0,
            islands: Islands::new(body_capacity),
            tree: DynamicAabbTree::new(body_capacity),
            moved_scratch: Vec::new(),
            pair_scratch: Vec::new(),
            broken_scratch: Vec::new(),
            split_scratch: Vec::new(),
            thread_pool: match config.thread_model {
                ThreadModel::Persistent => build_thread_pool(),
                ThreadModel::Regular => None,
            },
            null_body: BodyHandle(0),
        };

        // pinned anchor for one-body constraints
        let mut anchor = RigidBodyData::new();
        anchor.make_static();
        let handle = world.body_data.allocate(anchor, false)?;
        world.bodies.push(Some(RigidBody::new(BodyHandle(handle), NULL_ISLAND)));
        world.null_body = BodyHandle(handle);

        debug!(
            "world created: {} bodies, {} contacts, {} constraints",
            config.num_bodies, config.num_contacts, config.num_constraints
        );
        Ok(world)
    }

    #[must_use]
    pub fn null_body(&self) -> BodyHandle {
        self.null_body
    }

    #[must_use]
    pub fn gravity(&self) -> Vec3A {
        self.gravity
    }

    pub const fn set_gravity(&mut self, gravity: Vec3A) {
        self.gravity = gravity;
    }

    pub fn set_solver_iterations(&mut self, iterations: u32) -> Result<(), PhysicsError> {
        if iterations < 1 {
            return Err(PhysicsError::InvalidArgument {
                reason: "solver_iterations must be at least 1",
            });
        }
        self.solver_iterations = iterations;
        Ok(())
    }

    pub fn set_num_substeps(&mut self, substeps: u32) -> Result<(), PhysicsError> {
        if substeps < 1 {
            return Err(PhysicsError::InvalidArgument {
                reason: "num_substeps must be at least 1",
            });
        }
        self.num_substeps = substeps;
        Ok(())
    }

    // ----- bodies ---------------------------------------------------------

    pub fn add_body(&mut self) -> Result<BodyHandle, PhysicsError> {
        let handle = self.body_data.allocate(RigidBodyData::new(), true)?;
        let body = BodyHandle(handle);
        if self.bodies.len() <= handle as usize {
            self.bodies.push(None);
        }
        let island = self.islands.create(body);
        self.bodies[handle as usize] = Some(RigidBody::new(body, island));
        Ok(body)
    }

    /// Removes the body together with its shapes, constraints and arbiters.
    /// Peers are woken; the body's island is split down to the singleton
    /// before it is destroyed.
    pub fn remove_body(&mut self, body: BodyHandle) -> Result<(), PhysicsError> {
        if body == self.null_body {
            return Err(PhysicsError::InvalidArgument {
                reason: "the anchor body cannot be removed",
            });
        }
        if self.bodies.get(body.0 as usize).is_none_or(Option::is_none) {
            return Err(PhysicsError::InvalidArgument {
                reason: "no such body",
            });
        }

        let constraints: Vec<ConstraintHandle> = self
            .body_ref(body)
            .constraints
            .clone();
        for handle in constraints {
            self.remove_constraint(handle)?;
        }

        let shapes = self.body_ref(body).shapes.clone();
        for shape in shapes {
            self.remove_shape(body, shape)?;
            self.destroy_shape(shape)?;
        }

        let island = self.body_ref(body).island;
        if island != NULL_ISLAND {
            // edges are gone; splitting leaves the body alone in some island
            self.split_island(island);
            let island = self.body_ref(body).island;
            self.islands.destroy(island);
        }

        self.body_data.free(body.0);
        self.bodies[body.0 as usize] = None;
        Ok(())
    }

    /// Turns the body static: infinite mass, no island, inactive partition.
    /// Meant to be called before the body grows contacts or constraints.
    pub fn set_body_static(&mut self, body: BodyHandle) -> Result<(), PhysicsError> {
        self.check_body(body)?;
        debug_assert!(self.body_ref(body).contacts.is_empty());

        self.body_data.get_mut(body.0).make_static();
        self.body_data.move_active(body.0, false);

        let island = self.body_ref(body).island;
        if island != NULL_ISLAND {
            self.islands.destroy(island);
            self.body_mut_ref(body).island = NULL_ISLAND;
        }
        Ok(())
    }

    #[must_use]
    pub fn body_data(&self, body: BodyHandle) -> &RigidBodyData {
        self.body_data.get(body.0)
    }

    #[must_use]
    pub fn body(&self, body: BodyHandle) -> &RigidBody {
        self.body_ref(body)
    }

    /// Cold-side parameters (damping, thresholds, material, flags). Hot
    /// state is mutated through the `set_body_*` operations so waking stays
    /// correct.
    pub fn body_mut(&mut self, body: BodyHandle) -> &mut RigidBody {
        self.body_mut_ref(body)
    }

    pub fn set_body_position(&mut self, body: BodyHandle, position: Vec3A) {
        self.body_data.get_mut(body.0).position = position;
        self.sync_body_shapes(body);
        self.wake_after_mutation(body);
    }

    pub fn set_body_orientation(&mut self, body: BodyHandle, orientation: glam::Mat3A) {
        let data = self.body_data.get_mut(body.0);
        data.orientation = orientation;
        data.update_world_inertia();
        self.sync_body_shapes(body);
        self.wake_after_mutation(body);
    }

    pub fn set_body_linear_velocity(&mut self, body: BodyHandle, velocity: Vec3A) {
        debug_assert!(velocity.is_finite());
        self.body_data.get_mut(body.0).linear_velocity = velocity;
        self.wake_after_mutation(body);
    }

    pub fn set_body_angular_velocity(&mut self, body: BodyHandle, velocity: Vec3A) {
        debug_assert!(velocity.is_finite());
        self.body_data.get_mut(body.0).angular_velocity = velocity;
        self.wake_after_mutation(body);
    }

    pub fn apply_force(&mut self, body: BodyHandle, force: Vec3A) {
        debug_assert!(force.is_finite());
        self.body_mut_ref(body).force += force;
        self.wake_after_mutation(body);
    }

    pub fn apply_torque(&mut self, body: BodyHandle, torque: Vec3A) {
        debug_assert!(torque.is_finite());
        self.body_mut_ref(body).torque += torque;
        self.wake_after_mutation(body);
    }

    pub fn activate_body(&mut self, body: BodyHandle) {
        self.wake_after_mutation(body);
    }

    #[must_use]
    pub fn is_body_active(&self, body: BodyHandle) -> bool {
        self.body_data.get(body.0).is_active()
    }

    #[must_use]
    pub fn active_body_count(&self) -> usize {
        self.body_data.active_count()
    }

    #[must_use]
    pub fn bodies_share_island(&self, a: BodyHandle, b: BodyHandle) -> bool {
        let ia = self.body_ref(a).island;
        let ib = self.body_ref(b).island;
        ia != NULL_ISLAND && ia == ib
    }

    #[must_use]
    pub fn island_active(&self, body: BodyHandle) -> bool {
        let island = self.body_ref(body).island;
        island != NULL_ISLAND && self.islands.get(island).marked_as_active
    }

    #[must_use]
    pub fn active_island_count(&self) -> usize {
        self.islands.active_count()
    }

    // ----- shapes ---------------------------------------------------------

    pub fn create_shape(&mut self, kind: ShapeKind) -> ShapeHandle {
        let handle = if let Some(id) = self.free_shapes.pop() {
            id
        } else {
            self.shapes.push(None);
            self.shapes.len() as u32 - 1
        };
        self.shapes[handle as usize] = Some(Shape::new(ShapeHandle(handle), kind));
        ShapeHandle(handle)
    }

    /// Attaches the shape and folds its mass into the body. Fails with
    /// `ShapeAlreadyAttached` when the shape sits on another body and with
    /// `ZeroMassShape` when a dynamic body would gain a massless shape; use
    /// [`World::attach_shape_unweighted`] for that.
    pub fn attach_shape(&mut self, body: BodyHandle, shape: ShapeHandle) -> Result<(), PhysicsError> {
        self.attach_shape_inner(body, shape, true)
    }

    /// Attach without touching the body's mass properties.
    pub fn attach_shape_unweighted(
        &mut self,
        body: BodyHandle,
        shape: ShapeHandle,
    ) -> Result<(), PhysicsError> {
        self.attach_shape_inner(body, shape, false)
    }

    pub fn add_shape(&mut self, body: BodyHandle, kind: ShapeKind) -> Result<ShapeHandle, PhysicsError> {
        let shape = self.create_shape(kind);
        if let Err(err) = self.attach_shape(body, shape) {
            self.shapes[shape.0 as usize] = None;
            self.free_shapes.push(shape.0);
            return Err(err);
        }
        Ok(shape)
    }

    pub fn add_shape_unweighted(
        &mut self,
        body: BodyHandle,
        kind: ShapeKind,
    ) -> Result<ShapeHandle, PhysicsError> {
        let shape = self.create_shape(kind);
        if let Err(err) = self.attach_shape_unweighted(body, shape) {
            self.shapes[shape.0 as usize] = None;
            self.free_shapes.push(shape.0);
            return Err(err);
        }
        Ok(shape)
    }

    fn attach_shape_inner(
        &mut self,
        body: BodyHandle,
        shape: ShapeHandle,
        with_mass: bool,
    ) -> Result<(), PhysicsError> {
        self.check_body(body)?;
        let Some(slot) = self.shapes.get(shape.0 as usize).and_then(Option::as_ref) else {
            return Err(PhysicsError::InvalidArgument { reason: "no such shape" });
        };
        if slot.body.is_some() {
            return Err(PhysicsError::ShapeAlreadyAttached);
        }

        let dynamic = !self.body_data.get(body.0).is_static();
        if with_mass && dynamic && slot.kind.mass_properties().mass <= 0.0 {
            return Err(PhysicsError::ZeroMassShape);
        }

        let (position, orientation) = {
            let data = self.body_data.get(body.0);
            (data.position, data.orientation)
        };
        let shape_mut = self.shapes[shape.0 as usize]
            .as_mut()
            .unwrap_or_else(|| unreachable!());
        shape_mut.body = Some(body);
        shape_mut.update_world_bounding_box(position, orientation);
        let fat = shape_mut.world_aabb.fattened(AABB_MARGIN);
        shape_mut.proxy = Some(self.tree.add_proxy(shape.0, fat));

        self.body_mut_ref(body).shapes.push(shape);
        if with_mass && dynamic {
            self.recompute_mass_properties(body);
        }
        self.wake_after_mutation(body);
        Ok(())
    }

    /// Detaches the shape: its arbiters disappear and the body's mass is
    /// recomputed. The shape itself stays available for reattachment.
    pub fn remove_shape(&mut self, body: BodyHandle, shape: ShapeHandle) -> Result<(), PhysicsError> {
        self.check_body(body)?;
        let attached = self
            .shapes
            .get(shape.0 as usize)
            .and_then(Option::as_ref)
            .and_then(|s| s.body);
        if attached != Some(body) {
            return Err(PhysicsError::ShapeNotPresent);
        }

        let contacts = self.body_ref(body).contacts.clone();
        for arbiter in contacts {
            let touches = {
                let arb = self.arbiters.get(arbiter);
                arb.shape1 == shape || arb.shape2 == shape
            };
            if touches {
                self.remove_arbiter_internal(arbiter);
            }
        }

        let shape_mut = self.shapes[shape.0 as usize]
            .as_mut()
            .unwrap_or_else(|| unreachable!());
        shape_mut.body = None;
        if let Some(proxy) = shape_mut.proxy.take() {
            self.tree.remove_proxy(proxy);
        }

        self.body_mut_ref(body).shapes.retain(|&s| s != shape);
        if !self.body_data.get(body.0).is_static() {
            self.recompute_mass_properties(body);
        }
        self.wake_after_mutation(body);
        Ok(())
    }

    /// Frees a detached shape slot.
    pub fn destroy_shape(&mut self, shape: ShapeHandle) -> Result<(), PhysicsError> {
        match self.shapes.get(shape.0 as usize).and_then(Option::as_ref) {
            None => Err(PhysicsError::InvalidArgument { reason: "no such shape" }),
            Some(slot) if slot.body.is_some() => Err(PhysicsError::ShapeAlreadyAttached),
            Some(_) => {
                self.shapes[shape.0 as usize] = None;
                self.free_shapes.push(shape.0);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn shape(&self, shape: ShapeHandle) -> Option<&Shape> {
        self.shapes.get(shape.0 as usize).and_then(Option::as_ref)
    }

    // ----- constraints ----------------------------------------------------

    /// Registers a constraint between two bodies. The constraint is probed
    /// for rows immediately so an implementation that never initializes
    /// itself is rejected at the boundary.
    pub fn add_constraint(
        &mut self,
        mut implementation: Box<dyn Constraint>,
        body1: BodyHandle,
        body2: BodyHandle,
    ) -> Result<ConstraintHandle, PhysicsError> {
        self.check_body(body1)?;
        self.check_body(body2)?;
        if body1 == body2 {
            return Err(PhysicsError::InvalidArgument {
                reason: "constraint needs two distinct bodies",
            });
        }
        let static1 = self.body_data.get(body1.0).is_static();
        let static2 = self.body_data.get(body2.0).is_static();
        if static1 && static2 {
            return Err(PhysicsError::InvalidArgument {
                reason: "constraint needs at least one dynamic body",
            });
        }
        if self.constraint_count >= self.constraint_capacity {
            return Err(PhysicsError::CapacityExceeded {
                resource: "constraints",
                capacity: self.constraint_capacity,
            });
        }

        let mut data = ConstraintData::new(body1, body2);
        implementation.prepare(
            1.0 / 60.0,
            self.body_data.get(body1.0),
            self.body_data.get(body2.0),
            &mut data,
        );
        if data.rows.is_empty() {
            return Err(PhysicsError::MissingConstraintInitialization);
        }
        data.initialized = true;

        let handle = if let Some(id) = self.free_constraints.pop() {
            id
        } else {
            self.constraints.push(None);
            self.constraints.len() as u32 - 1
        };
        self.constraints[handle as usize] = Some(ConstraintEntry {
            implementation,
            data,
        });
        self.constraint_count += 1;
        let constraint = ConstraintHandle(handle);

        self.body_mut_ref(body1).constraints.push(constraint);
        self.body_mut_ref(body2).constraints.push(constraint);

        // wake before merging, for the same reason as arbiter creation
        self.wake_after_mutation(body1);
        self.wake_after_mutation(body2);
        if !static1 && !static2 {
            self.link_bodies(body1, body2);
        }

        let owner = if static1 { body2 } else { body1 };
        let island = self.body_ref(owner).island;
        self.islands.get_mut(island).constraints.push(constraint);

        Ok(constraint)
    }

    pub fn remove_constraint(&mut self, constraint: ConstraintHandle) -> Result<(), PhysicsError> {
        let Some(entry) = self
            .constraints
            .get_mut(constraint.0 as usize)
            .and_then(Option::take)
        else {
            return Err(PhysicsError::InvalidArgument {
                reason: "no such constraint",
            });
        };
        self.free_constraints.push(constraint.0);
        self.constraint_count -= 1;

        let (body1, body2) = (entry.data.body1, entry.data.body2);
        for body in [body1, body2] {
            if let Some(cold) = self.bodies[body.0 as usize].as_mut() {
                cold.constraints.retain(|&c| c != constraint);
            }
        }

        let static1 = self.body_data.get(body1.0).is_static();
        let static2 = self.body_data.get(body2.0).is_static();
        if !static1 && !static2 {
            self.body_mut_ref(body1).remove_connection(body2);
            self.body_mut_ref(body2).remove_connection(body1);
        }

        let owner = if static1 { body2 } else { body1 };
        let island = self.body_ref(owner).island;
        if island != NULL_ISLAND {
            let island = self.islands.get_mut(island);
            island.constraints.retain(|&c| c != constraint);
            island.needs_update = true;
        }

        self.wake_after_mutation(body1);
        self.wake_after_mutation(body2);
        Ok(())
    }

    // ----- queries --------------------------------------------------------

    #[must_use]
    pub fn arbiter_between(&self, a: ShapeHandle, b: ShapeHandle) -> Option<&ContactData> {
        let handle = *self.arbiter_map.get(&ArbiterKey::new(a, b))?;
        Some(self.arbiters.get(handle))
    }

    #[must_use]
    pub fn arbiter_count(&self) -> usize {
        self.arbiters.len()
    }

    pub fn arbiters(&self) -> impl Iterator<Item = &ContactData> {
        self.arbiters.elements().iter()
    }

    pub fn active_islands(&self) -> impl Iterator<Item = &Island> {
        self.islands.iter_active().map(|(_, island)| island)
    }

    /// Broadphase ray cast. `hit` gets each leaf whose bounds the ray
    /// enters, with the entry distance, and returns the new clip distance.
    pub fn ray_cast(
        &self,
        origin: Vec3A,
        direction: Vec3A,
        max_t: f32,
        hit: &mut impl FnMut(ShapeHandle, f32) -> f32,
    ) {
        self.tree
            .ray_cast(origin, direction, max_t, &mut |payload, t| {
                hit(ShapeHandle(payload), t)
            });
    }

    /// Depth-bounded broadphase walk for debug views.
    pub fn enumerate_broadphase(
        &self,
        visitor: &mut impl FnMut(&crate::linear_math::aabb::Aabb, u32, bool),
        max_depth: u32,
    ) {
        self.tree.enumerate_all(visitor, max_depth);
    }

    // ----- stepping -------------------------------------------------------

    /// Advances the world by `dt`. All user mutation must happen outside
    /// this call; `multi_thread` fans the island phases out over the worker
    /// pool.
    pub fn step(&mut self, dt: f32, multi_thread: bool) -> Result<(), PhysicsError> {
        if !(dt > 0.0) || !dt.is_finite() {
            return Err(PhysicsError::InvalidArgument {
                reason: "dt must be positive and finite",
            });
        }
        if multi_thread && self.thread_pool.is_none() {
            self.thread_pool = build_thread_pool();
        }

        let h = dt / self.num_substeps as f32;

        self.integrate_forces(h);
        self.update_broadphase(dt);
        self.discover_pairs();
        self.narrowphase(dt, multi_thread);
        self.remove_broken_arbiters();
        self.split_marked_islands();

        for _ in 0..self.num_substeps {
            self.solve_islands(h, multi_thread);
        }

        self.apply_damping();
        self.update_sleep_state(dt);
        self.clear_forces();
        Ok(())
    }

    /// External forces produce the predicted velocities, scaled to the first
    /// substep's share of the step.
    fn integrate_forces(&mut self, h: f32) {
        let gravity = self.gravity;
        let bodies = &self.bodies;
        for data in self.body_data.active_mut() {
            debug_assert!(!data.is_static());
            let Some(cold) = bodies[data.index as usize].as_ref() else {
                continue;
            };
            let mut acceleration = cold.force * data.inverse_mass;
            if cold.affected_by_gravity {
                acceleration += gravity;
            }
            data.linear_velocity = sanitize(data.linear_velocity + acceleration * h);
            data.angular_velocity =
                sanitize(data.angular_velocity + data.inverse_inertia_world * cold.torque * h);
        }
    }

    fn update_broadphase(&mut self, dt: f32) {
        let bodies = &self.bodies;
        let shapes = &mut self.shapes;
        let tree = &mut self.tree;
        for data in self.body_data.active() {
            let Some(cold) = bodies[data.index as usize].as_ref() else {
                continue;
            };
            for &handle in &cold.shapes {
                let Some(shape) = shapes[handle.0 as usize].as_mut() else {
                    continue;
                };
                shape.update_world_bounding_box(data.position, data.orientation);
                let Some(proxy) = shape.proxy else { continue };
                let mut fat = shape.world_aabb.fattened(AABB_MARGIN);
                if cold.enable_speculative_contacts {
                    fat = fat.swept(data.linear_velocity * dt);
                }
                tree.update(proxy, &shape.world_aabb, fat);
            }
        }
    }

    /// Pairs from moved proxies become arbiters; creating one merges and
    /// wakes the islands involved.
    fn discover_pairs(&mut self) {
        let mut moved = std::mem::take(&mut self.moved_scratch);
        let mut pairs = std::mem::take(&mut self.pair_scratch);
        moved.clear();
        pairs.clear();
        self.tree.drain_moved(&mut moved);

        {
            let tree = &self.tree;
            let shapes = &self.shapes;
            for &leaf in &moved {
                let payload = tree.payload(leaf);
                if shapes.get(payload as usize).is_none_or(Option::is_none) {
                    continue;
                }
                let aabb = *tree.fat_aabb(leaf);
                tree.query(&aabb, &mut |other_leaf, other_payload| {
                    if other_leaf != leaf {
                        pairs.push((payload, other_payload));
                    }
                });
            }
        }

        for (s1, s2) in pairs.drain(..) {
            self.try_create_arbiter(ShapeHandle(s1), ShapeHandle(s2));
        }
        self.moved_scratch = moved;
        self.pair_scratch = pairs;
    }

    fn try_create_arbiter(&mut self, s1: ShapeHandle, s2: ShapeHandle) {
        let key = ArbiterKey::new(s1, s2);
        if self.arbiter_map.contains_key(&key) {
            return;
        }
        let (Some(shape1), Some(shape2)) = (
            self.shapes.get(s1.0 as usize).and_then(Option::as_ref),
            self.shapes.get(s2.0 as usize).and_then(Option::as_ref),
        ) else {
            return;
        };
        let (Some(b1), Some(b2)) = (shape1.body, shape2.body) else {
            return;
        };
        if b1 == b2 {
            return;
        }

        let static1 = self.body_data.get(b1.0).is_static();
        let static2 = self.body_data.get(b2.0).is_static();
        if static1 && static2 {
            return;
        }

        let cold1 = self.body_ref(b1);
        let cold2 = self.body_ref(b2);
        let (friction, restitution) = if static1 || static2 {
            (
                cold1.friction.min(cold2.friction),
                cold1.restitution.max(cold2.restitution),
            )
        } else {
            (
                cold1.friction * cold2.friction,
                cold1.restitution * cold2.restitution,
            )
        };

        let arbiter = ContactData::new(key, s1, s2, b1, b2, friction, restitution);
        let handle = match self.arbiters.allocate(arbiter, true) {
            Ok(handle) => handle,
            Err(err) => {
                warn!("dropping contact pair: {err}");
                return;
            }
        };
        self.arbiter_map.insert(key, handle);

        self.body_mut_ref(b1).contacts.push(handle);
        self.body_mut_ref(b2).contacts.push(handle);

        // discovery of a touching pair wakes the islands on both sides; wake
        // before merging so a sleeping side cannot hide behind an already
        // active merged island
        self.wake_body(b1);
        self.wake_body(b2);
        if !static1 && !static2 {
            self.link_bodies(b1, b2);
        }

        let owner = if static1 { b2 } else { b1 };
        let island = self.body_ref(owner).island;
        self.islands.get_mut(island).arbiters.push(handle);
    }

    /// Connects two dynamic bodies in the graph, merging their islands.
    fn link_bodies(&mut self, b1: BodyHandle, b2: BodyHandle) {
        self.body_mut_ref(b1).add_connection(b2);
        self.body_mut_ref(b2).add_connection(b1);

        let i1 = self.body_ref(b1).island;
        let i2 = self.body_ref(b2).island;
        if i1 != i2 {
            self.islands.merge(i1, i2, &mut self.bodies);
        }
    }

    /// Per-island manifold refresh and narrowphase; islands run in parallel
    /// and stash broken arbiters for the sequential phase.
    fn narrowphase(&mut self, dt: f32, multi_thread: bool) {
        let use_epa = self.use_full_epa_solver;
        let bodies_access = self.body_data.access();
        let arbiters_access = self.arbiters.access();
        let shapes = &self.shapes;
        let bodies_cold = &self.bodies;
        let tree = &self.tree;
        let pool = if multi_thread { self.thread_pool.as_ref() } else { None };

        for_each_active_island(pool, self.islands.slice_mut(), |island| {
            island.broken.clear();
            for &handle in &island.arbiters {
                // safety: this arbiter belongs to exactly this island
                let arbiter = unsafe { arbiters_access.by_handle(handle) };

                let (Some(shape1), Some(shape2)) = (
                    shapes[arbiter.shape1.0 as usize].as_ref(),
                    shapes[arbiter.shape2.0 as usize].as_ref(),
                ) else {
                    island.broken.push(handle);
                    continue;
                };
                let (Some(p1), Some(p2)) = (shape1.proxy, shape2.proxy) else {
                    island.broken.push(handle);
                    continue;
                };
                if !tree.fat_aabb(p1).intersects(tree.fat_aabb(p2)) {
                    island.broken.push(handle);
                    continue;
                }

                let a = bodies_access.read(arbiter.body1.0);
                let b = bodies_access.read(arbiter.body2.0);
                let pair = SupportPair {
                    shape_a: &shape1.kind,
                    pos_a: a.position,
                    orn_a: a.orientation,
                    shape_b: &shape2.kind,
                    pos_b: b.position,
                    orn_b: b.orientation,
                };
                let speculative = bodies_cold[arbiter.body1.0 as usize]
                    .as_ref()
                    .is_some_and(|c| c.enable_speculative_contacts)
                    || bodies_cold[arbiter.body2.0 as usize]
                        .as_ref()
                        .is_some_and(|c| c.enable_speculative_contacts);
                let rel_velocity = a.linear_velocity - b.linear_velocity;

                convex_driver::update_contact(
                    arbiter,
                    &pair,
                    rel_velocity,
                    dt,
                    speculative,
                    use_epa,
                );
            }
        });
    }

    fn remove_broken_arbiters(&mut self) {
        let mut broken = std::mem::take(&mut self.broken_scratch);
        broken.clear();
        for island in self.islands.slice_mut() {
            if island.in_use {
                broken.append(&mut island.broken);
            }
        }
        for handle in broken.drain(..) {
            self.remove_arbiter_internal(handle);
        }
        self.broken_scratch = broken;
    }

    fn remove_arbiter_internal(&mut self, handle: u32) {
        if !self.arbiters.contains(handle) {
            return;
        }
        let (key, b1, b2) = {
            let arbiter = self.arbiters.get(handle);
            (arbiter.key, arbiter.body1, arbiter.body2)
        };
        self.arbiter_map.remove(&key);

        for body in [b1, b2] {
            if let Some(cold) = self.bodies[body.0 as usize].as_mut() {
                cold.contacts.retain(|&c| c != handle);
            }
        }

        let static1 = self.body_data.get(b1.0).is_static();
        let static2 = self.body_data.get(b2.0).is_static();
        if !static1 && !static2 {
            self.body_mut_ref(b1).remove_connection(b2);
            self.body_mut_ref(b2).remove_connection(b1);
        }

        let owner = if static1 { b2 } else { b1 };
        let island = self.body_ref(owner).island;
        if island != NULL_ISLAND {
            let island = self.islands.get_mut(island);
            island.arbiters.retain(|&a| a != handle);
            island.needs_update = true;
        }

        // losing a contact wakes whoever was leaning on it
        self.wake_body(b1);
        self.wake_body(b2);
        self.arbiters.free(handle);
    }

    fn split_marked_islands(&mut self) {
        let mut marked = std::mem::take(&mut self.split_scratch);
        marked.clear();
        for (id, island) in self.islands.slice_mut().iter().enumerate() {
            if island.in_use && island.needs_update {
                marked.push(id as u32);
            }
        }
        for id in marked.drain(..) {
            self.split_island(id);
        }
        self.split_scratch = marked;
    }

    /// Deferred repartition: walks the remaining connection edges and gives
    /// every connected component its own island. Never runs mid-solve.
    fn split_island(&mut self, id: u32) {
        self.islands.get_mut(id).needs_update = false;
        let members = std::mem::take(&mut self.islands.get_mut(id).bodies);
        if members.len() <= 1 {
            self.islands.get_mut(id).bodies = members;
            return;
        }

        let was_active = self.islands.get(id).marked_as_active;
        let old_arbiters = std::mem::take(&mut self.islands.get_mut(id).arbiters);
        let old_constraints = std::mem::take(&mut self.islands.get_mut(id).constraints);

        let mut visited: AHashMap<BodyHandle, ()> = AHashMap::with_capacity(members.len());
        let mut queue: Vec<BodyHandle> = Vec::new();
        let mut first_component = true;

        for &seed in &members {
            if visited.contains_key(&seed) {
                continue;
            }

            let island_id = if first_component {
                first_component = false;
                id
            } else {
                self.islands.create_empty()
            };

            queue.push(seed);
            visited.insert(seed, ());
            while let Some(body) = queue.pop() {
                self.islands.get_mut(island_id).bodies.push(body);
                self.body_mut_ref(body).island = island_id;
                let neighbors: Vec<BodyHandle> = self
                    .body_ref(body)
                    .connections
                    .iter()
                    .map(|&(other, _)| other)
                    .collect();
                for other in neighbors {
                    if !visited.contains_key(&other) {
                        visited.insert(other, ());
                        queue.push(other);
                    }
                }
            }
            self.islands.get_mut(island_id).marked_as_active = was_active;
        }

        for handle in old_arbiters {
            let (b1, b2) = {
                let arbiter = self.arbiters.get(handle);
                (arbiter.body1, arbiter.body2)
            };
            let owner = if self.body_data.get(b1.0).is_static() { b2 } else { b1 };
            let island = self.body_ref(owner).island;
            self.islands.get_mut(island).arbiters.push(handle);
        }
        for constraint in old_constraints {
            let Some(entry) = self.constraints[constraint.0 as usize].as_ref() else {
                continue;
            };
            let (b1, b2) = (entry.data.body1, entry.data.body2);
            let owner = if self.body_data.get(b1.0).is_static() { b2 } else { b1 };
            let island = self.body_ref(owner).island;
            self.islands.get_mut(island).constraints.push(constraint);
        }
    }

    /// One substep: prepare rows, iterate, fold velocities, write back warm
    /// impulses and integrate positions, island-parallel.
    fn solve_islands(&mut self, h: f32, multi_thread: bool) {
        let iterations = self.solver_iterations;
        let settings = self.settings;
        let bodies_access = self.body_data.access();
        let arbiters_access = self.arbiters.access();
        let constraints_access = RawAccess::new(&mut self.constraints[..]);
        let pool = if multi_thread { self.thread_pool.as_ref() } else { None };

        for_each_active_island(pool, self.islands.slice_mut(), |island| {
            solve_island(
                island,
                &bodies_access,
                &arbiters_access,
                &constraints_access,
                &settings,
                iterations,
                h,
            );
        });
    }

    fn apply_damping(&mut self) {
        let exponent = self.num_substeps as f32;
        let bodies = &self.bodies;
        for data in self.body_data.active_mut() {
            let Some(cold) = bodies[data.index as usize].as_ref() else {
                continue;
            };
            data.linear_velocity *= cold.linear_damping.powf(exponent);
            data.angular_velocity *= cold.angular_damping.powf(exponent);
        }
    }

    /// End-of-step sleep bookkeeping. Deactivation time accrues with the
    /// outer step dt regardless of substeps.
    fn update_sleep_state(&mut self, dt: f32) {
        if !self.allow_deactivation {
            return;
        }

        let island_count = self.islands.slice_mut().len();
        for id in 0..island_count as u32 {
            {
                let island = self.islands.get(id);
                if !island.in_use || !island.marked_as_active || island.bodies.is_empty() {
                    continue;
                }
            }

            let mut all_resting = true;
            let member_count = self.islands.get(id).bodies.len();
            for i in 0..member_count {
                let body = self.islands.get(id).bodies[i];
                let (lin_sq, ang_sq) = {
                    let data = self.body_data.get(body.0);
                    (
                        data.linear_velocity.length_squared(),
                        data.angular_velocity.length_squared(),
                    )
                };
                let cold = self.body_mut_ref(body);
                if lin_sq < cold.sleep_linear_threshold_sq && ang_sq < cold.sleep_angular_threshold_sq
                {
                    cold.sleep_time += dt;
                } else {
                    cold.sleep_time = 0.0;
                }
                if cold.sleep_time < cold.deactivation_time {
                    all_resting = false;
                }
            }

            if all_resting {
                self.deactivate_island(id);
            }
        }
    }

    fn deactivate_island(&mut self, id: u32) {
        trace!("island {id} falls asleep");
        self.islands.get_mut(id).marked_as_active = false;

        let member_count = self.islands.get(id).bodies.len();
        for i in 0..member_count {
            let body = self.islands.get(id).bodies[i];
            let data = self.body_data.get_mut(body.0);
            data.flags &= !crate::dynamics::rigid_body::BODY_ACTIVE;
            data.linear_velocity = Vec3A::ZERO;
            data.angular_velocity = Vec3A::ZERO;
            self.body_data.move_active(body.0, false);
        }

        let arbiter_count = self.islands.get(id).arbiters.len();
        for i in 0..arbiter_count {
            let handle = self.islands.get(id).arbiters[i];
            self.arbiters.move_active(handle, false);
        }
    }

    fn wake_island(&mut self, id: u32) {
        if id == NULL_ISLAND || self.islands.get(id).marked_as_active {
            return;
        }
        trace!("island {id} wakes up");
        self.islands.get_mut(id).marked_as_active = true;

        let member_count = self.islands.get(id).bodies.len();
        for i in 0..member_count {
            let body = self.islands.get(id).bodies[i];
            let data = self.body_data.get_mut(body.0);
            data.flags |= crate::dynamics::rigid_body::BODY_ACTIVE;
            self.body_data.move_active(body.0, true);
            self.body_mut_ref(body).sleep_time = 0.0;
        }

        let arbiter_count = self.islands.get(id).arbiters.len();
        for i in 0..arbiter_count {
            let handle = self.islands.get(id).arbiters[i];
            self.arbiters.move_active(handle, true);
        }
    }

    /// Wakes a dynamic body's island; statics have none.
    fn wake_body(&mut self, body: BodyHandle) {
        let island = self.body_ref(body).island;
        if island != NULL_ISLAND {
            self.wake_island(island);
        }
    }

    /// User mutation wakes the island, and for a static body the islands of
    /// everything touching it.
    fn wake_after_mutation(&mut self, body: BodyHandle) {
        if !self.body_data.get(body.0).is_static() {
            self.wake_body(body);
            return;
        }

        let mut peers: Vec<BodyHandle> = Vec::new();
        {
            let cold = self.body_ref(body);
            for &arbiter in &cold.contacts {
                let arb = self.arbiters.get(arbiter);
                peers.push(if arb.body1 == body { arb.body2 } else { arb.body1 });
            }
            for &constraint in &cold.constraints {
                if let Some(entry) = self.constraints[constraint.0 as usize].as_ref() {
                    let other = if entry.data.body1 == body {
                        entry.data.body2
                    } else {
                        entry.data.body1
                    };
                    peers.push(other);
                }
            }
        }
        for peer in peers {
            self.wake_body(peer);
        }
    }

    fn clear_forces(&mut self) {
        let count = self.body_data.active_count();
        for i in 0..count {
            let handle = self.body_data.active()[i].index;
            if let Some(cold) = self.bodies[handle as usize].as_mut() {
                cold.clear_forces();
            }
        }
    }

    fn sync_body_shapes(&mut self, body: BodyHandle) {
        let (position, orientation) = {
            let data = self.body_data.get(body.0);
            (data.position, data.orientation)
        };
        let shapes = self.body_ref(body).shapes.clone();
        for handle in shapes {
            let Some(shape) = self.shapes[handle.0 as usize].as_mut() else {
                continue;
            };
            shape.update_world_bounding_box(position, orientation);
            if let Some(proxy) = shape.proxy {
                let fat = shape.world_aabb.fattened(AABB_MARGIN);
                self.tree.update(proxy, &shape.world_aabb, fat);
            }
        }
    }

    fn recompute_mass_properties(&mut self, body: BodyHandle) {
        let mut mass = 0.0;
        let mut inertia = glam::Mat3A::ZERO;
        for &handle in &self.body_ref(body).shapes {
            if let Some(shape) = self.shapes[handle.0 as usize].as_ref() {
                let properties = shape.kind.mass_properties();
                mass += properties.mass;
                inertia += properties.inertia;
            }
        }

        let data = self.body_data.get_mut(body.0);
        if mass > 0.0 {
            data.set_mass_from(mass, inertia);
        } else {
            data.inverse_mass = 1.0;
            data.inverse_inertia_local = glam::Mat3A::IDENTITY;
            data.update_world_inertia();
        }
    }

    fn check_body(&self, body: BodyHandle) -> Result<(), PhysicsError> {
        if self.bodies.get(body.0 as usize).is_none_or(Option::is_none) {
            return Err(PhysicsError::InvalidArgument { reason: "no such body" });
        }
        Ok(())
    }

    fn body_ref(&self, body: BodyHandle) -> &RigidBody {
        self.bodies[body.0 as usize]
            .as_ref()
            .unwrap_or_else(|| unreachable!())
    }

    fn body_mut_ref(&mut self, body: BodyHandle) -> &mut RigidBody {
        self.bodies[body.0 as usize]
            .as_mut()
            .unwrap_or_else(|| unreachable!())
    }
}

fn build_thread_pool() -> Option<rayon::ThreadPool> {
    let workers = std::thread::available_parallelism().map_or(4, |n| n.get());
    match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => Some(pool),
        Err(err) => {
            warn!("worker pool unavailable, stepping single-threaded: {err}");
            None
        }
    }
}

fn for_each_active_island<F>(pool: Option<&rayon::ThreadPool>, islands: &mut [Island], f: F)
where
    F: Fn(&mut Island) + Sync,
{
    let live = |island: &&mut Island| -> bool {
        island.in_use && island.marked_as_active && !island.bodies.is_empty()
    };
    match pool {
        Some(pool) => pool.install(|| {
            islands.par_iter_mut().filter(live).for_each(|island| f(island));
        }),
        None => islands.iter_mut().filter(live).for_each(|island| f(island)),
    }
}

/// One island's substep: rows into the island scratch, warm start, serial
/// iterations, velocity fold, impulse write-back, position integration.
///
/// Safety: islands are disjoint, so the unchecked pool accesses touch
/// records no other worker can reach; the debug lock word asserts exactly
/// that.
fn solve_island(
    island: &mut Island,
    bodies: &PoolAccess<'_, RigidBodyData>,
    arbiters: &PoolAccess<'_, ContactData>,
    constraints: &RawAccess<'_, Option<ConstraintEntry>>,
    settings: &SolverSettings,
    iterations: u32,
    h: f32,
) {
    island.rows.clear();
    let mut fixed = RigidBodyData::fixed();
    let fixed_ptr: *mut RigidBodyData = &mut fixed;

    #[cfg(debug_assertions)]
    for &body in &island.bodies {
        bodies.read(body.0).debug_lock();
    }

    // constraints first; row order within the island is preparation order
    for &handle in &island.constraints {
        let entry = unsafe { constraints.get_mut(handle.0 as usize) };
        let Some(entry) = entry.as_mut() else { continue };
        if !entry.implementation.is_enabled() {
            continue;
        }
        debug_assert!(entry.data.initialized);

        let (b1, b2) = (entry.data.body1, entry.data.body2);
        let a = bodies.read(b1.0);
        let b = bodies.read(b2.0);
        entry.implementation.prepare(h, a, b, &mut entry.data);

        for (i, row) in entry.data.rows.iter().enumerate() {
            let mut row = *row;
            row.applied_impulse = entry.data.impulse_cache[i] * settings.warm_start_factor;
            row.body_a = if a.is_static() { SOLVER_FIXED } else { b1.0 };
            row.body_b = if b.is_static() { SOLVER_FIXED } else { b2.0 };
            row.source = RowSource::Constraint {
                constraint: handle.0,
                row: i as u8,
            };
            island.rows.push(row);
        }
    }

    for &handle in &island.arbiters {
        let arbiter = unsafe { arbiters.by_handle(handle) };
        if arbiter.live_count() == 0 {
            continue;
        }
        let a = bodies.read(arbiter.body1.0);
        let b = bodies.read(arbiter.body2.0);
        // substeps move bodies; bias and separation work on current geometry
        arbiter.refresh_positions(a.position, a.orientation, b.position, b.orientation);
        let arbiter = &*arbiter;
        let slot_a = if a.is_static() { SOLVER_FIXED } else { arbiter.body1.0 };
        let slot_b = if b.is_static() { SOLVER_FIXED } else { arbiter.body2.0 };
        constraint_solver::push_contact_rows(
            &mut island.rows,
            handle,
            arbiter,
            a,
            b,
            slot_a,
            slot_b,
            settings,
            h,
        );
    }

    // warm start
    for i in 0..island.rows.len() {
        let row = island.rows[i];
        if row.body_a == SOLVER_FIXED && row.body_b == SOLVER_FIXED {
            continue;
        }
        let (a, b) = unsafe { body_pair(bodies, fixed_ptr, row.body_a, row.body_b) };
        row.apply_warm_start(a, b);
    }

    // serial sequential-impulse iterations
    for _ in 0..iterations {
        for i in 0..island.rows.len() {
            let normal_row = island.rows[i].normal_row;
            if normal_row != NO_NORMAL_ROW {
                let normal_impulse = island.rows[normal_row as usize].applied_impulse;
                if normal_impulse <= 0.0 {
                    continue;
                }
                let limit = island.rows[i].friction * normal_impulse;
                island.rows[i].lower_limit = -limit;
                island.rows[i].upper_limit = limit;
            }

            let mut row = island.rows[i];
            if row.body_a == SOLVER_FIXED && row.body_b == SOLVER_FIXED {
                continue;
            }
            let (a, b) = unsafe { body_pair(bodies, fixed_ptr, row.body_a, row.body_b) };
            row.resolve(a, b);
            island.rows[i] = row;
        }
    }

    // fold deltas into the primary velocities
    for &body in &island.bodies {
        let data = unsafe { bodies.by_handle(body.0) };
        data.linear_velocity = sanitize(data.linear_velocity + data.delta_linear_velocity);
        data.angular_velocity = sanitize(data.angular_velocity + data.delta_angular_velocity);
        data.delta_linear_velocity = Vec3A::ZERO;
        data.delta_angular_velocity = Vec3A::ZERO;
    }

    // write accumulated impulses back into the persistent records
    for row in &island.rows {
        match row.source {
            RowSource::Contact { arbiter, slot, kind } => {
                let arbiter = unsafe { arbiters.by_handle(arbiter) };
                let point = &mut arbiter.points[slot as usize];
                match kind {
                    ContactRowKind::Normal => point.normal_impulse = row.applied_impulse,
                    ContactRowKind::Tangent1 => point.tangent_impulse1 = row.applied_impulse,
                    ContactRowKind::Tangent2 => point.tangent_impulse2 = row.applied_impulse,
                }
            }
            RowSource::Constraint { constraint, row: i } => {
                let entry = unsafe { constraints.get_mut(constraint as usize) };
                if let Some(entry) = entry.as_mut() {
                    entry.data.impulse_cache[i as usize] = row.applied_impulse;
                }
            }
            RowSource::None => {}
        }
    }

    // integrate positions by the substep and refresh world inertia
    for &body in &island.bodies {
        let data = unsafe { bodies.by_handle(body.0) };
        data.position += data.linear_velocity * h;
        data.orientation = integrate_orientation(data.orientation, data.angular_velocity, h);
        data.update_world_inertia();
    }

    #[cfg(debug_assertions)]
    for &body in &island.bodies {
        bodies.read(body.0).debug_unlock();
    }
}

/// Resolves the two row sides to disjoint references, routing static sides
/// to the island-local dummy.
///
/// Safety: caller guarantees `a != b` unless both are `SOLVER_FIXED`, which
/// the row loops skip.
unsafe fn body_pair<'b>(
    bodies: &'b PoolAccess<'_, RigidBodyData>,
    fixed: *mut RigidBodyData,
    a: u32,
    b: u32,
) -> (&'b mut RigidBodyData, &'b mut RigidBodyData) {
    debug_assert!(a != b || a == SOLVER_FIXED);
    let ra = if a == SOLVER_FIXED {
        unsafe { &mut *fixed }
    } else {
        unsafe { bodies.by_handle(a) }
    };
    let rb = if b == SOLVER_FIXED {
        unsafe { &mut *fixed }
    } else {
        unsafe { bodies.by_handle(b) }
    };
    (ra, rb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::BoxShape;

    fn small_world() -> World {
        World::new(WorldConfiguration {
            num_bodies: 16,
            num_contacts: 64,
            num_constraints: 8,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn configuration_is_validated() {
        let bad = WorldConfiguration {
            solver_iterations: 0,
            ..Default::default()
        };
        assert!(matches!(
            World::new(bad),
            Err(PhysicsError::InvalidArgument { .. })
        ));

        let bad = WorldConfiguration {
            num_substeps: 0,
            ..Default::default()
        };
        assert!(World::new(bad).is_err());
    }

    #[test]
    fn bodies_start_in_singleton_islands() {
        let mut world = small_world();
        let a = world.add_body().unwrap();
        let b = world.add_body().unwrap();
        assert!(!world.bodies_share_island(a, b));
        assert!(world.is_body_active(a));
        assert_eq!(world.active_body_count(), 2);
    }

    #[test]
    fn body_capacity_is_enforced() {
        let mut world = World::new(WorldConfiguration {
            num_bodies: 2,
            num_contacts: 8,
            num_constraints: 2,
            ..Default::default()
        })
        .unwrap();
        world.add_body().unwrap();
        world.add_body().unwrap();
        let err = world.add_body().unwrap_err();
        assert!(matches!(err, PhysicsError::CapacityExceeded { .. }));
        assert_eq!(world.active_body_count(), 2);
    }

    #[test]
    fn shape_attachment_errors() {
        let mut world = small_world();
        let a = world.add_body().unwrap();
        let b = world.add_body().unwrap();

        let shape = world.create_shape(ShapeKind::Box(BoxShape::with_size(1.0, 1.0, 1.0)));
        world.attach_shape(a, shape).unwrap();
        assert_eq!(
            world.attach_shape(b, shape),
            Err(PhysicsError::ShapeAlreadyAttached)
        );

        assert_eq!(world.remove_shape(b, shape), Err(PhysicsError::ShapeNotPresent));
        world.remove_shape(a, shape).unwrap();
        world.attach_shape(b, shape).unwrap();
    }

    #[test]
    fn zero_mass_shape_needs_override() {
        let mut world = small_world();
        let body = world.add_body().unwrap();
        let triangle = ShapeKind::Triangle(crate::shapes::TriangleShape::new(
            Vec3A::ZERO,
            Vec3A::X,
            Vec3A::Z,
        ));
        assert_eq!(
            world.add_shape(body, triangle.clone()),
            Err(PhysicsError::ZeroMassShape)
        );
        world.add_shape_unweighted(body, triangle).unwrap();
    }

    #[test]
    fn invalid_dt_is_rejected() {
        let mut world = small_world();
        assert!(world.step(0.0, false).is_err());
        assert!(world.step(f32::NAN, false).is_err());
        assert!(world.step(1.0 / 60.0, false).is_ok());
    }

    #[test]
    fn uninitialized_constraint_is_rejected() {
        struct Lazy;
        impl Constraint for Lazy {
            fn prepare(
                &mut self,
                _dt: f32,
                _a: &RigidBodyData,
                _b: &RigidBodyData,
                _data: &mut ConstraintData,
            ) {
            }
        }

        let mut world = small_world();
        let a = world.add_body().unwrap();
        let b = world.add_body().unwrap();
        let err = world.add_constraint(Box::new(Lazy), a, b).unwrap_err();
        assert_eq!(err, PhysicsError::MissingConstraintInitialization);
    }

    #[test]
    fn contact_merges_islands() {
        let mut world = small_world();
        let a = world.add_body().unwrap();
        world.add_shape(a, ShapeKind::Box(BoxShape::with_size(1.0, 1.0, 1.0))).unwrap();
        let b = world.add_body().unwrap();
        world.add_shape(b, ShapeKind::Box(BoxShape::with_size(1.0, 1.0, 1.0))).unwrap();

        world.set_body_position(b, Vec3A::new(0.0, 0.9, 0.0));
        world.set_gravity(Vec3A::ZERO);
        world.step(1.0 / 60.0, false).unwrap();

        assert!(world.bodies_share_island(a, b));
        assert!(world.arbiter_count() > 0);
    }

    #[test]
    fn separation_splits_islands_again() {
        let mut world = small_world();
        world.set_gravity(Vec3A::ZERO);
        let a = world.add_body().unwrap();
        world.add_shape(a, ShapeKind::Box(BoxShape::with_size(1.0, 1.0, 1.0))).unwrap();
        let b = world.add_body().unwrap();
        world.add_shape(b, ShapeKind::Box(BoxShape::with_size(1.0, 1.0, 1.0))).unwrap();
        world.set_body_position(b, Vec3A::new(0.0, 0.9, 0.0));
        world.step(1.0 / 60.0, false).unwrap();
        assert!(world.bodies_share_island(a, b));

        world.set_body_position(b, Vec3A::new(10.0, 0.0, 0.0));
        world.set_body_linear_velocity(b, Vec3A::ZERO);
        world.step(1.0 / 60.0, false).unwrap();
        assert!(!world.bodies_share_island(a, b));
        assert_eq!(world.arbiter_count(), 0);
    }

    #[test]
    fn remove_body_clears_every_reference() {
        let mut world = small_world();
        world.set_gravity(Vec3A::ZERO);
        let a = world.add_body().unwrap();
        let sa = world.add_shape(a, ShapeKind::Box(BoxShape::with_size(1.0, 1.0, 1.0))).unwrap();
        let b = world.add_body().unwrap();
        let sb = world.add_shape(b, ShapeKind::Box(BoxShape::with_size(1.0, 1.0, 1.0))).unwrap();
        world.set_body_position(b, Vec3A::new(0.0, 0.9, 0.0));

        let constraint = world
            .add_constraint(
                Box::new(crate::dynamics::constraints::DistanceConstraint::new(
                    Vec3A::ZERO,
                    Vec3A::ZERO,
                    0.9,
                )),
                a,
                b,
            )
            .unwrap();
        world.step(1.0 / 60.0, false).unwrap();
        assert!(world.arbiter_between(sa, sb).is_some());

        world.remove_body(b).unwrap();
        assert!(world.arbiter_between(sa, sb).is_none());
        assert_eq!(world.arbiter_count(), 0);
        assert!(world.remove_constraint(constraint).is_err());
        assert!(world.is_body_active(a));
        assert!(world.body(a).constraints().is_empty());
        world.step(1.0 / 60.0, false).unwrap();
    }
}
