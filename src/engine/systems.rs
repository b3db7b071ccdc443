// Demo movement backends.
// Straight-line steering toward the destination, standing in for a real
// navmesh or A* library. They honour `can_move` and raise the reached flag
// the way a pathfinding backend would.

use bevy_ecs::prelude::*;
use glam::Vec3;

use super::components::*;

/// Planar offset from `from` to `to` and its length.
fn planar_offset(from: Vec3, to: Vec3) -> (Vec3, f32) {
    let offset = Vec3::new(to.x - from.x, 0.0, to.z - from.z);
    (offset, offset.length())
}

/// Move navmesh-style agents at constant speed, directly on the transform.
pub fn mesh_navigation_system(world: &mut World, delta_time: f32) {
    let mut query = world.query_filtered::<(&mut Transform, &mut MeshAgent), Without<RigidBody>>();
    for (mut transform, mut agent) in query.iter_mut(world) {
        if !agent.can_move || agent.destination == Vec3::ZERO {
            agent.velocity = Vec3::ZERO;
            continue;
        }
        let (offset, dist) = planar_offset(transform.position, agent.destination);
        if dist <= agent.stopping_distance {
            agent.reached = true;
            agent.velocity = Vec3::ZERO;
            continue;
        }
        let step = (agent.speed * delta_time).min(dist);
        agent.velocity = offset / dist * agent.speed;
        transform.position += offset / dist * step;
    }
}

/// Steer A*-style agents, slowing down inside `slowdown_distance`.
///
/// Agents with a dynamic rigid body only get a target velocity; the physics
/// step moves them. Agents without one are moved directly.
pub fn path_navigation_system(world: &mut World, delta_time: f32) {
    let mut query = world.query::<(&mut Transform, &mut PathAgent, Option<&mut RigidBody>)>();
    for (mut transform, mut agent, body) in query.iter_mut(world) {
        let mut desired = Vec3::ZERO;
        if agent.can_move && agent.destination != Vec3::ZERO {
            let (offset, dist) = planar_offset(transform.position, agent.destination);
            if dist <= agent.end_reached_distance {
                agent.reached = true;
            } else {
                let slowdown = (dist / agent.slowdown_distance.max(f32::EPSILON)).min(1.0);
                desired = offset / dist * agent.max_speed * slowdown;
            }
        }
        agent.velocity = desired;

        match body {
            Some(mut body) if !body.is_kinematic => {
                body.linear_velocity.x = desired.x;
                body.linear_velocity.z = desired.z;
            }
            _ => transform.position += desired * delta_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_agent_walks_and_stops() {
        let mut world = World::new();
        let e = world
            .spawn((
                Transform::default(),
                MeshAgent {
                    destination: Vec3::new(0.0, 0.0, 5.0),
                    ..Default::default()
                },
            ))
            .id();

        for _ in 0..200 {
            mesh_navigation_system(&mut world, 0.05);
        }
        let agent = world.get::<MeshAgent>(e).unwrap();
        assert!(agent.reached);
        let z = world.get::<Transform>(e).unwrap().position.z;
        assert!((z - 4.0).abs() < 0.2, "stopped at {z}");
    }

    #[test]
    fn frozen_agents_do_not_move() {
        let mut world = World::new();
        let e = world
            .spawn((
                Transform::default(),
                PathAgent {
                    destination: Vec3::new(10.0, 0.0, 0.0),
                    can_move: false,
                    ..Default::default()
                },
            ))
            .id();

        path_navigation_system(&mut world, 0.1);
        assert_eq!(world.get::<Transform>(e).unwrap().position, Vec3::ZERO);
        assert_eq!(world.get::<PathAgent>(e).unwrap().velocity, Vec3::ZERO);
    }

    #[test]
    fn path_agent_with_body_only_sets_velocity() {
        let mut world = World::new();
        let e = world
            .spawn((
                Transform::default(),
                PathAgent {
                    destination: Vec3::new(10.0, 0.0, 0.0),
                    ..Default::default()
                },
                RigidBody::default(),
            ))
            .id();

        path_navigation_system(&mut world, 0.1);
        assert_eq!(world.get::<Transform>(e).unwrap().position, Vec3::ZERO);
        let body = world.get::<RigidBody>(e).unwrap();
        assert!((body.linear_velocity.x - 5.0).abs() < 1e-5);
    }
}
