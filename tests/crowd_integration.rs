// End-to-end checks through the public API: real World, demo backends,
// manager, physics profiles and the integration step together.

use std::time::Duration;

use bevy_ecs::prelude::*;
use glam::Vec3;

use crowd_avoidance::engine::{
    AgentTuning, Avoidance, AvoidanceManager, Collider, CollisionPolicy, ManagerConfig, MeshAgent,
    PathAgent, PhysicsConfig, PhysicsProfileManager, RateConfig, RateController, RigidBody,
    Transform, integrate, mesh_navigation_system, path_navigation_system,
};

fn manager_with_interval(cycle_interval: f32) -> AvoidanceManager {
    AvoidanceManager::new(ManagerConfig {
        cycle_interval,
        ..ManagerConfig::default()
    })
}

fn spawn_mesh(world: &mut World, position: Vec3, destination: Vec3) -> Entity {
    world
        .spawn((
            Transform::from_position(position),
            MeshAgent {
                destination,
                ..Default::default()
            },
            Avoidance::new(&AgentTuning::default()),
        ))
        .id()
}

#[test]
fn agent_latches_after_three_cycles_in_stop_zone() {
    let mut world = World::new();
    let mut manager = manager_with_interval(0.2);
    let agent = spawn_mesh(&mut world, Vec3::new(0.0, 0.0, 9.0), Vec3::new(0.0, 0.0, 10.0));
    assert!(manager.register(&world, agent));

    manager.tick(&mut world, 0.2);
    manager.tick(&mut world, 0.2);
    assert!(!world.get::<Avoidance>(agent).unwrap().has_reached_destination());
    assert!(world.get::<MeshAgent>(agent).unwrap().can_move);

    manager.tick(&mut world, 0.2);
    let avoidance = world.get::<Avoidance>(agent).unwrap();
    assert!(avoidance.has_reached_destination());
    assert!(avoidance.time_at_destination() >= 0.5);
    assert!(!world.get::<MeshAgent>(agent).unwrap().can_move);
    assert_eq!(manager.cycles_completed(), 3);
}

#[test]
fn boundary_oscillation_never_latches() {
    let mut world = World::new();
    let mut manager = manager_with_interval(0.2);
    let agent = spawn_mesh(&mut world, Vec3::new(0.0, 0.0, 9.0), Vec3::new(0.0, 0.0, 10.0));
    manager.register(&world, agent);

    for cycle in 0..40 {
        let z = if cycle % 2 == 0 { 9.0 } else { 7.0 };
        world.get_mut::<Transform>(agent).unwrap().position.z = z;
        manager.tick(&mut world, 0.2);
        assert!(!world.get::<Avoidance>(agent).unwrap().has_reached_destination());
    }
    assert!(world.get::<MeshAgent>(agent).unwrap().can_move);
}

#[test]
fn close_pair_pushes_apart() {
    let mut world = World::new();
    let mut manager = manager_with_interval(0.1);
    let a = spawn_mesh(&mut world, Vec3::ZERO, Vec3::ZERO);
    let b = spawn_mesh(&mut world, Vec3::new(0.0, 0.0, 0.5), Vec3::ZERO);
    for e in [a, b] {
        world.entity_mut(e).insert(RigidBody::default());
        manager.register(&world, e);
    }

    manager.force_update_all(&mut world);

    let da = world.get::<Avoidance>(a).unwrap().avoidance_direction();
    let db = world.get::<Avoidance>(b).unwrap().avoidance_direction();
    assert!((da.z + 0.75).abs() < 1e-5, "{da}");
    assert!((db.z - 0.75).abs() < 1e-5, "{db}");
    assert_eq!(da.y, 0.0);
    let fa = world.get::<RigidBody>(a).unwrap().pending_force;
    assert!(fa.z < 0.0 && fa.length() <= 8.0);
}

#[test]
fn sustained_overload_throttles_to_bounds() {
    let mut rate = RateController::new(RateConfig::default(), 10, 0.1);
    let mut last = (rate.agents_per_cycle(), rate.cycle_interval());
    for _ in 0..10 {
        rate.record_cycle(Duration::from_millis(20));
    }
    assert!(rate.agents_per_cycle() < last.0);
    assert!(rate.cycle_interval() > last.1);

    for _ in 0..30 {
        last = (rate.agents_per_cycle(), rate.cycle_interval());
        for _ in 0..10 {
            rate.record_cycle(Duration::from_millis(20));
        }
        assert!(rate.agents_per_cycle() <= last.0);
        assert!(rate.cycle_interval() >= last.1);
    }
    assert_eq!(rate.agents_per_cycle(), 1);
    assert!(rate.cycle_interval() <= 0.5 + 1e-6);
}

#[test]
fn policy_toggle_is_batched() {
    let mut world = World::new();
    let mut physics = PhysicsProfileManager::new(
        PhysicsConfig {
            batch_size: 25,
            ..PhysicsConfig::default()
        },
        AgentTuning::default(),
    );
    let agents: Vec<_> = (0..60)
        .map(|i| {
            let e = world
                .spawn((Transform::from_position(Vec3::X * i as f32), PathAgent::default()))
                .id();
            physics.register(&mut world, e).unwrap();
            e
        })
        .collect();

    physics.set_policy(CollisionPolicy::Disabled);
    assert_eq!(physics.tick(&mut world), 25);
    assert_eq!(physics.tick(&mut world), 25);
    assert_eq!(physics.tick(&mut world), 10);
    assert_eq!(physics.tick(&mut world), 0);

    for &e in &agents {
        assert!(world.get::<RigidBody>(e).unwrap().is_kinematic);
        assert!(!world.get::<Collider>(e).unwrap().is_blocking());
    }
}

#[test]
fn mixed_crowd_arrives_and_drops_collision() {
    let mut world = World::new();
    let tuning = AgentTuning::default();
    let mut manager = manager_with_interval(0.1);
    let mut physics = PhysicsProfileManager::new(PhysicsConfig::default(), tuning);

    let mut agents = Vec::new();
    for i in 0..10 {
        let x = i as f32 * 5.0;
        let start = Transform::from_position(Vec3::new(x, 0.0, -30.0));
        let destination = Vec3::new(x, 0.0, 1.0);
        let avoidance = Avoidance::new(&tuning);
        let e = if i % 2 == 0 {
            world
                .spawn((start, MeshAgent { destination, ..Default::default() }, avoidance))
                .id()
        } else {
            world
                .spawn((start, PathAgent { destination, ..Default::default() }, avoidance))
                .id()
        };
        physics.register(&mut world, e).unwrap();
        assert!(manager.register(&world, e));
        agents.push(e);
    }

    let dt = 1.0 / 60.0;
    for _ in 0..(30 * 60) {
        mesh_navigation_system(&mut world, dt);
        path_navigation_system(&mut world, dt);
        manager.tick(&mut world, dt);
        physics.tick(&mut world);
        integrate(&mut world, dt);
    }

    assert_eq!(manager.statistics().total, 10);
    for &e in &agents {
        assert!(world.get::<Avoidance>(e).unwrap().has_reached_destination(), "{e:?}");
        if let Some(path) = world.get::<PathAgent>(e) {
            assert!(!path.can_move);
            assert!(world.get::<RigidBody>(e).unwrap().is_kinematic);
            assert!(world.get::<Collider>(e).unwrap().is_trigger);
        }
    }
}

#[test]
fn despawned_agents_do_not_stop_the_loop() {
    let mut world = World::new();
    let mut manager = manager_with_interval(0.1);
    let agents: Vec<_> = (0..6)
        .map(|i| {
            let e = spawn_mesh(&mut world, Vec3::new(i as f32, 0.0, 0.0), Vec3::new(0.0, 0.0, 20.0));
            manager.register(&world, e);
            e
        })
        .collect();

    manager.tick(&mut world, 0.1);
    world.despawn(agents[1]);
    world.despawn(agents[4]);
    for _ in 0..20 {
        manager.tick(&mut world, 0.05);
    }
    manager.force_update_all(&mut world);

    let stats = manager.statistics();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.high + stats.medium + stats.low, 4);
}
