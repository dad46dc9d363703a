//! Quantified invariants: island partition, pool partition, warm-start
//! persistence and energy behavior.

use glam::Vec3A;
use tumble::{BoxShape, ShapeKind, SphereShape, World, WorldConfiguration};

const DT: f32 = 1.0 / 60.0;

fn world_with_gravity(gravity: Vec3A) -> World {
    World::new(WorldConfiguration {
        gravity,
        ..Default::default()
    })
    .unwrap()
}

fn add_cube(world: &mut World, center: Vec3A) -> (tumble::BodyHandle, tumble::ShapeHandle) {
    let body = world.add_body().unwrap();
    world.set_body_position(body, center);
    let shape = world
        .add_shape(body, ShapeKind::Box(BoxShape::with_size(1.0, 1.0, 1.0)))
        .unwrap();
    (body, shape)
}

fn assert_partition_invariants(world: &World) {
    // every dynamic-dynamic arbiter couples bodies of one island
    for arbiter in world.arbiters() {
        let d1 = world.body_data(arbiter.body1);
        let d2 = world.body_data(arbiter.body2);
        if !d1.is_static() && !d2.is_static() {
            assert!(
                world.bodies_share_island(arbiter.body1, arbiter.body2),
                "arbiter spans two islands"
            );
        }
    }

    // the pool's active prefix is exactly the active islands' bodies
    let pool_active = world.active_body_count();
    let island_active: usize = world.active_islands().map(|island| island.bodies.len()).sum();
    assert_eq!(pool_active, island_active, "pool partition out of sync");

    for island in world.active_islands() {
        for &body in &island.bodies {
            assert!(world.is_body_active(body), "inactive body in active island");
        }
    }
}

#[test]
fn partition_holds_through_pile_lifecycle() {
    let mut world = world_with_gravity(Vec3A::new(0.0, -9.81, 0.0));

    let floor = world.add_body().unwrap();
    world.set_body_static(floor).unwrap();
    world.set_body_position(floor, Vec3A::new(0.0, -1.0, 0.0));
    world
        .add_shape(floor, ShapeKind::Box(BoxShape::new(Vec3A::new(50.0, 1.0, 50.0))))
        .unwrap();

    for i in 0..12 {
        let x = (i % 4) as f32 * 1.8 - 3.0;
        let y = 0.5 + (i / 4) as f32 * 1.0;
        add_cube(&mut world, Vec3A::new(x, y, 0.0));
    }

    for step in 0..400 {
        world.step(DT, false).unwrap();
        if step % 40 == 0 {
            assert_partition_invariants(&world);
        }
    }
    assert_partition_invariants(&world);
}

#[test]
fn resting_contact_keeps_warm_impulse() {
    let mut world = world_with_gravity(Vec3A::new(0.0, -9.81, 0.0));

    let floor = world.add_body().unwrap();
    world.set_body_static(floor).unwrap();
    world.set_body_position(floor, Vec3A::new(0.0, -1.0, 0.0));
    let floor_shape = world
        .add_shape(floor, ShapeKind::Box(BoxShape::new(Vec3A::new(50.0, 1.0, 50.0))))
        .unwrap();

    let (cube, cube_shape) = add_cube(&mut world, Vec3A::new(0.0, 0.6, 0.0));
    // keep the island awake so the solver runs every step
    world.body_mut(cube).deactivation_time = f32::MAX;

    // let it land
    for _ in 0..60 {
        world.step(DT, false).unwrap();
    }

    for _ in 0..60 {
        world.step(DT, false).unwrap();
        let arbiter = world
            .arbiter_between(floor_shape, cube_shape)
            .expect("resting contact must persist");
        let total: f32 = arbiter
            .live_slots()
            .map(|slot| arbiter.points[slot].normal_impulse)
            .sum();
        assert!(total > 0.0, "warm-start impulse was lost");
    }
}

#[test]
fn elastic_impact_does_not_inject_energy() {
    let mut world = world_with_gravity(Vec3A::ZERO);

    let mut bodies = Vec::new();
    for (x, v) in [(-2.0, 2.0), (2.0, -2.0)] {
        let body = world.add_body().unwrap();
        world.set_body_position(body, Vec3A::new(x, 0.0, 0.0));
        world
            .add_shape(body, ShapeKind::Sphere(SphereShape::new(0.5)))
            .unwrap();
        world.set_body_linear_velocity(body, Vec3A::new(v, 0.0, 0.0));
        let cold = world.body_mut(body);
        cold.restitution = 1.0;
        cold.linear_damping = 1.0;
        cold.angular_damping = 1.0;
        cold.deactivation_time = f32::MAX;
        bodies.push(body);
    }

    let kinetic = |world: &World| -> f32 {
        bodies
            .iter()
            .map(|&b| {
                let data = world.body_data(b);
                0.5 * data.linear_velocity.length_squared() / data.inverse_mass
            })
            .sum()
    };

    let initial = kinetic(&world);
    let mut previous = initial;
    for _ in 0..120 {
        world.step(DT, false).unwrap();
        let now = kinetic(&world);
        assert!(now <= previous * 1.01, "energy grew: {previous} -> {now}");
        previous = now;
    }
    // restitution 1 keeps most of the energy through the bounce
    assert!(previous > initial * 0.5, "lost too much energy: {initial} -> {previous}");
}

#[test]
fn capacity_refusal_leaves_world_intact() {
    let mut world = World::new(WorldConfiguration {
        num_bodies: 3,
        num_contacts: 16,
        num_constraints: 4,
        ..Default::default()
    })
    .unwrap();

    let mut handles = Vec::new();
    for _ in 0..3 {
        handles.push(world.add_body().unwrap());
    }
    let err = world.add_body().unwrap_err();
    assert!(matches!(err, tumble::PhysicsError::CapacityExceeded { .. }));
    assert_eq!(world.active_body_count(), 3);

    // the refused allocation must not have disturbed existing handles
    for &h in &handles {
        assert!(world.is_body_active(h));
    }
    world.step(DT, false).unwrap();
}
