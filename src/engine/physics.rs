// Collision toggle and physics profiles.
//
// This is the only module that changes whether an agent takes part in the
// physical simulation (collider trigger flag, body kinematic flag, collision
// detection). The avoidance manager goes through the arrival helpers below.
//
// Toggling the global policy re-applies it to every registered entity.
// Re-application is batched: `tick` handles `batch_size` entities per call,
// so a large crowd is reconfigured over several frames.

use std::collections::{HashMap, VecDeque};

use bevy_ecs::prelude::*;
use glam::Vec3;
use log::{debug, info, warn};

use super::avoidance::Avoidance;
use super::components::{
    BodyConstraints, Collider, CollisionDetection, MeshAgent, ObstacleAvoidance, PathAgent,
    RigidBody, Transform,
};
use super::config::{AgentTuning, PhysicsConfig};
use super::error::PhysicsError;
use super::movement::Backend;

const GRAVITY: f32 = 9.81;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionPolicy {
    Enabled,
    Disabled,
}

impl CollisionPolicy {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            CollisionPolicy::Enabled
        } else {
            CollisionPolicy::Disabled
        }
    }
}

pub struct PhysicsProfileManager {
    config: PhysicsConfig,
    tuning: AgentTuning,
    policy: CollisionPolicy,
    backends: HashMap<Entity, Backend>,
    order: Vec<Entity>,
    queue: VecDeque<Entity>,
}

impl PhysicsProfileManager {
    /// `tuning` is used for `Avoidance` components this manager has to create.
    pub fn new(config: PhysicsConfig, tuning: AgentTuning) -> Self {
        Self {
            policy: CollisionPolicy::from_enabled(config.collision_enabled),
            config,
            tuning,
            backends: HashMap::new(),
            order: Vec::new(),
            queue: VecDeque::new(),
        }
    }

    pub fn policy(&self) -> CollisionPolicy {
        self.policy
    }

    /// Detect the entity's backend and apply the current policy to it.
    pub fn register(&mut self, world: &mut World, entity: Entity) -> Result<Backend, PhysicsError> {
        if !world.entities().contains(entity) {
            return Err(PhysicsError::Stale(entity));
        }
        let backend =
            Backend::detect(world, entity).ok_or(PhysicsError::MissingMovementContract(entity))?;
        if self.backends.insert(entity, backend).is_none() {
            self.order.push(entity);
        }
        self.apply_one(world, entity, backend)?;
        Ok(backend)
    }

    pub fn unregister(&mut self, entity: Entity) -> bool {
        if self.backends.remove(&entity).is_none() {
            return false;
        }
        self.order.retain(|&e| e != entity);
        self.queue.retain(|&e| e != entity);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Entities still waiting for the current policy.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Switch the global policy. Registered entities are reconfigured by
    /// subsequent `tick` calls.
    pub fn set_policy(&mut self, policy: CollisionPolicy) {
        if policy == self.policy && self.queue.is_empty() {
            return;
        }
        info!("collision policy -> {:?} for {} entities", policy, self.order.len());
        self.policy = policy;
        self.queue.clear();
        self.queue.extend(self.order.iter().copied());
    }

    /// Reconfigure up to `batch_size` queued entities. Returns how many were
    /// attempted; failures are logged and skipped.
    pub fn tick(&mut self, world: &mut World) -> usize {
        let budget = self.config.batch_size.max(1);
        let mut attempted = 0;
        while attempted < budget {
            let Some(entity) = self.queue.pop_front() else {
                break;
            };
            attempted += 1;
            let Some(&backend) = self.backends.get(&entity) else {
                continue;
            };
            if let Err(err) = self.apply_one(world, entity, backend) {
                warn!("physics profile: {err}");
                if matches!(err, PhysicsError::Stale(_)) {
                    self.unregister(entity);
                }
            }
        }
        attempted
    }

    /// Drain the whole queue now.
    pub fn apply_all(&mut self, world: &mut World) {
        while !self.queue.is_empty() {
            self.tick(world);
        }
    }

    fn apply_one(&self, world: &mut World, entity: Entity, backend: Backend) -> Result<(), PhysicsError> {
        if !world.entities().contains(entity) {
            return Err(PhysicsError::Stale(entity));
        }
        match (backend, self.policy) {
            // Navmesh agents keep their Avoidance; only the backend's own
            // obstacle avoidance is switched.
            (Backend::Mesh, policy) => {
                let mut mesh = world
                    .get_mut::<MeshAgent>(entity)
                    .ok_or(PhysicsError::MissingMovementContract(entity))?;
                mesh.obstacle_avoidance = match policy {
                    CollisionPolicy::Enabled => ObstacleAvoidance::HighQuality,
                    CollisionPolicy::Disabled => ObstacleAvoidance::None,
                };
            }
            (Backend::Path, CollisionPolicy::Enabled) => self.enable_path_agent(world, entity)?,
            (Backend::Path, CollisionPolicy::Disabled) => disable_path_agent(world, entity),
        }
        debug!("physics profile {:?} applied to {:?} ({:?})", self.policy, entity, backend);
        Ok(())
    }

    /// Attach or reconfigure collider, dynamic body and avoidance.
    fn enable_path_agent(&self, world: &mut World, entity: Entity) -> Result<(), PhysicsError> {
        let c = &self.config;
        {
            let mut path = world
                .get_mut::<PathAgent>(entity)
                .ok_or(PhysicsError::MissingMovementContract(entity))?;
            path.max_speed = path.max_speed.max(c.min_path_speed);
            path.slowdown_distance = c.path_slowdown_distance;
            path.pick_next_waypoint_distance = c.path_waypoint_distance;
        }

        let mut collider = world.get::<Collider>(entity).copied().unwrap_or(Collider {
            radius: c.collider_radius,
            height: c.collider_height,
            center_y: c.collider_center_y,
            ..Collider::default()
        });
        collider.is_trigger = false;
        collider.enabled = true;

        let mut body = world.get::<RigidBody>(entity).copied().unwrap_or_default();
        body.is_kinematic = false;
        body.detect_collisions = true;
        body.mass = c.body_mass;
        body.linear_damping = c.linear_damping;
        body.angular_damping = c.angular_damping;
        body.use_gravity = false;
        body.constraints = BodyConstraints {
            freeze_rotation: true,
            freeze_position_y: true,
        };
        body.collision_detection = CollisionDetection::Continuous;

        let mut avoidance = world
            .get::<Avoidance>(entity)
            .cloned()
            .unwrap_or_else(|| Avoidance::new(&self.tuning));
        avoidance.enabled = true;
        if avoidance.has_reached_destination() && avoidance.disable_collision_at_destination {
            set_arrival_profile(Some(&mut collider), Some(&mut body));
        }

        world.entity_mut(entity).insert((collider, body, avoidance));
        Ok(())
    }
}

/// Turn avoidance off and take the body out of blocking contacts.
fn disable_path_agent(world: &mut World, entity: Entity) {
    if let Some(mut avoidance) = world.get_mut::<Avoidance>(entity) {
        avoidance.enabled = false;
    }
    if let Some(mut body) = world.get_mut::<RigidBody>(entity) {
        body.is_kinematic = true;
        body.detect_collisions = false;
    }
    if let Some(mut collider) = world.get_mut::<Collider>(entity) {
        collider.is_trigger = true;
    }
}

// ============================================================================
// ARRIVAL PROFILE
// ============================================================================

/// Arrived agents stop blocking others: trigger-only collider, kinematic body.
pub fn set_arrival_profile(collider: Option<&mut Collider>, body: Option<&mut RigidBody>) {
    if let Some(collider) = collider {
        collider.is_trigger = true;
    }
    if let Some(body) = body {
        body.stop();
        body.is_kinematic = true;
        body.detect_collisions = false;
    }
}

/// Undo `set_arrival_profile` when the agent sets off again.
pub fn restore_collision_profile(collider: Option<&mut Collider>, body: Option<&mut RigidBody>) {
    if let Some(collider) = collider {
        collider.is_trigger = false;
    }
    if let Some(body) = body {
        body.is_kinematic = false;
        body.detect_collisions = true;
    }
}

// ============================================================================
// INTEGRATION
// ============================================================================

/// Minimal rigid-body step standing in for the host physics engine:
/// force → velocity, gravity, linear damping, axis locks, velocity → position.
pub fn integrate(world: &mut World, dt: f32) {
    if dt <= 0.0 {
        return;
    }
    let mut query = world.query::<(&mut Transform, &mut RigidBody)>();
    for (mut transform, mut body) in query.iter_mut(world) {
        if body.is_kinematic {
            body.pending_force = Vec3::ZERO;
            continue;
        }
        let mass = body.mass.max(f32::EPSILON);
        let accel = body.pending_force / mass;
        body.linear_velocity += accel * dt;
        if body.use_gravity {
            body.linear_velocity.y -= GRAVITY * dt;
        }
        let damping = body.linear_damping;
        body.linear_velocity *= 1.0 / (1.0 + damping * dt);
        if body.constraints.freeze_position_y {
            body.linear_velocity.y = 0.0;
        }
        transform.position += body.linear_velocity * dt;
        body.pending_force = Vec3::ZERO;
    }
}
