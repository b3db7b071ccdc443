// Headless crowd demo.
// Spawns a mixed crowd (navmesh-style and A*-style agents) converging on one
// target and runs the avoidance scheduler against a fixed-step host loop.
//
// Usage: crowd_avoidance [config.toml]
// Verbosity via RUST_LOG, e.g. RUST_LOG=crowd_avoidance=debug

use bevy_ecs::prelude::*;
use glam::Vec3;
use log::{error, info};

use crowd_avoidance::engine::{
    Avoidance, AvoidanceManager, CollisionPolicy, CrowdConfig, MeshAgent, PathAgent,
    PhysicsProfileManager, Transform, integrate, mesh_navigation_system, path_navigation_system,
};

const AGENT_COUNT: usize = 400;
const FIXED_DT: f32 = 1.0 / 60.0;
const SIMULATED_SECONDS: f32 = 40.0;
const TARGET: Vec3 = Vec3::new(0.0, 0.0, 0.0);

// ============================================================================
// ENTITY SPAWNING
// ============================================================================

fn spawn_crowd(
    world: &mut World,
    config: &CrowdConfig,
    manager: &mut AvoidanceManager,
    physics: &mut PhysicsProfileManager,
    count: usize,
) {
    use rand::Rng;
    let mut rng = rand::thread_rng();

    for i in 0..count {
        let angle = rng.gen_range(0.0..std::f32::consts::TAU);
        let distance = rng.gen_range(20.0..90.0);
        let position = TARGET + Vec3::new(angle.cos() * distance, 0.0, angle.sin() * distance);
        let destination = TARGET + Vec3::new(rng.gen_range(-4.0..4.0), 0.0, rng.gen_range(-4.0..4.0));
        let avoidance = Avoidance::new(&config.agent);

        let entity = if i % 2 == 0 {
            world
                .spawn((
                    Transform::from_position(position),
                    MeshAgent {
                        destination,
                        ..Default::default()
                    },
                    avoidance,
                ))
                .id()
        } else {
            world
                .spawn((
                    Transform::from_position(position),
                    PathAgent {
                        destination,
                        ..Default::default()
                    },
                    avoidance,
                ))
                .id()
        };

        if let Err(err) = physics.register(world, entity) {
            error!("physics profile for {:?}: {err}", entity);
        }
        manager.register(world, entity);
    }

    info!("Spawned {} agents", count);
}

fn arrived_count(world: &mut World) -> usize {
    let mut query = world.query::<&Avoidance>();
    query.iter(world).filter(|a| a.has_reached_destination()).count()
}

// ============================================================================
// MAIN
// ============================================================================

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => CrowdConfig::load(&path),
        None => Ok(CrowdConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            std::process::exit(1);
        }
    };

    let mut world = World::new();
    let mut manager = AvoidanceManager::new(config.manager.clone());
    let mut physics = PhysicsProfileManager::new(config.physics.clone(), config.agent);
    manager.set_viewpoint(TARGET + Vec3::new(0.0, 30.0, -40.0));

    spawn_crowd(&mut world, &config, &mut manager, &mut physics, AGENT_COUNT);

    let mut elapsed = 0.0;
    let mut next_report = 1.0;
    let mut toggled = false;
    while elapsed < SIMULATED_SECONDS {
        mesh_navigation_system(&mut world, FIXED_DT);
        path_navigation_system(&mut world, FIXED_DT);
        manager.tick(&mut world, FIXED_DT);
        physics.tick(&mut world);
        integrate(&mut world, FIXED_DT);
        elapsed += FIXED_DT;

        // Brief collision-off window to exercise batched re-application.
        if elapsed >= 20.0 && !toggled {
            physics.set_policy(CollisionPolicy::Disabled);
            toggled = true;
        } else if elapsed >= 22.0 && physics.policy() == CollisionPolicy::Disabled {
            physics.set_policy(CollisionPolicy::Enabled);
        }

        if elapsed >= next_report {
            let stats = manager.statistics();
            info!(
                "t={:>4.1}s | agents {} (high {} / medium {} / low {}) | pending {} | {} agents/slice @ {:.2}s | arrived {}",
                elapsed,
                stats.total,
                stats.high,
                stats.medium,
                stats.low,
                stats.pending,
                manager.agents_per_cycle(),
                manager.cycle_interval(),
                arrived_count(&mut world),
            );
            next_report += 1.0;
        }
    }

    info!(
        "Done: {} cycles, {} of {} agents arrived",
        manager.cycles_completed(),
        arrived_count(&mut world),
        AGENT_COUNT
    );
}
