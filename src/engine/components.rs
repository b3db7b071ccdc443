// Core ECS components for crowd agents.
// An agent is an entity with a Transform, one movement-contract component
// (MeshAgent or PathAgent) and an Avoidance component (see avoidance.rs).

use bevy_ecs::prelude::*;
use glam::Vec3;

/// Position of an entity in 3D space
#[derive(Component, Debug, Clone, Copy)]
pub struct Transform {
    pub position: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self { position }
    }
}

// ============================================================================
// MOVEMENT BACKENDS
// ============================================================================

/// Obstacle-avoidance quality requested from a navmesh-style backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObstacleAvoidance {
    None,
    #[default]
    HighQuality,
}

/// Navmesh-style movement backend state.
///
/// The path itself is computed elsewhere; this is the surface the avoidance
/// subsystem reads and steers.
#[derive(Component, Debug, Clone)]
pub struct MeshAgent {
    pub destination: Vec3,
    pub reached: bool,
    pub velocity: Vec3,
    pub can_move: bool,
    pub speed: f32,
    /// Distance at which the backend reports `reached`.
    pub stopping_distance: f32,
    pub obstacle_avoidance: ObstacleAvoidance,
}

impl Default for MeshAgent {
    fn default() -> Self {
        Self {
            destination: Vec3::ZERO,
            reached: false,
            velocity: Vec3::ZERO,
            can_move: true,
            speed: 3.5,
            stopping_distance: 1.0,
            obstacle_avoidance: ObstacleAvoidance::HighQuality,
        }
    }
}

/// Grid/graph A*-style movement backend state.
#[derive(Component, Debug, Clone)]
pub struct PathAgent {
    pub destination: Vec3,
    pub reached: bool,
    pub velocity: Vec3,
    pub can_move: bool,
    pub max_speed: f32,
    /// Backend reports `reached` inside this distance.
    pub end_reached_distance: f32,
    /// Backend starts braking inside this distance.
    pub slowdown_distance: f32,
    pub pick_next_waypoint_distance: f32,
}

impl Default for PathAgent {
    fn default() -> Self {
        Self {
            destination: Vec3::ZERO,
            reached: false,
            velocity: Vec3::ZERO,
            can_move: true,
            max_speed: 5.0,
            end_reached_distance: 1.0,
            slowdown_distance: 2.0,
            pick_next_waypoint_distance: 1.0,
        }
    }
}

// ============================================================================
// PHYSICAL REPRESENTATION
// ============================================================================

/// Capsule collider standing on the XZ plane.
///
/// `is_trigger` colliders report overlaps but never block other bodies.
#[derive(Component, Debug, Clone, Copy)]
pub struct Collider {
    pub radius: f32,
    pub height: f32,
    pub center_y: f32,
    pub is_trigger: bool,
    pub enabled: bool,
}

impl Default for Collider {
    fn default() -> Self {
        Self {
            radius: 0.5,
            height: 2.0,
            center_y: 1.0,
            is_trigger: false,
            enabled: true,
        }
    }
}

impl Collider {
    /// True when the collider takes part in blocking contacts.
    pub fn is_blocking(&self) -> bool {
        self.enabled && !self.is_trigger
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionDetection {
    #[default]
    Discrete,
    Continuous,
}

/// Per-axis locks applied by the physics step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BodyConstraints {
    pub freeze_rotation: bool,
    pub freeze_position_y: bool,
}

/// Rigid body receiving avoidance forces.
///
/// Forces accumulate in `pending_force` and are consumed by `physics::integrate`.
/// Kinematic bodies ignore forces entirely.
#[derive(Component, Debug, Clone, Copy)]
pub struct RigidBody {
    pub linear_velocity: Vec3,
    pub pending_force: Vec3,
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub use_gravity: bool,
    pub is_kinematic: bool,
    pub detect_collisions: bool,
    pub constraints: BodyConstraints,
    pub collision_detection: CollisionDetection,
}

impl Default for RigidBody {
    fn default() -> Self {
        Self {
            linear_velocity: Vec3::ZERO,
            pending_force: Vec3::ZERO,
            mass: 1.0,
            linear_damping: 0.0,
            angular_damping: 0.05,
            use_gravity: true,
            is_kinematic: false,
            detect_collisions: true,
            constraints: BodyConstraints::default(),
            collision_detection: CollisionDetection::Discrete,
        }
    }
}

impl RigidBody {
    /// Accumulate a continuous force for the next physics step.
    pub fn add_force(&mut self, force: Vec3) {
        if !self.is_kinematic {
            self.pending_force += force;
        }
    }

    /// XZ part of the velocity.
    pub fn horizontal_velocity(&self) -> Vec3 {
        Vec3::new(self.linear_velocity.x, 0.0, self.linear_velocity.z)
    }

    /// Clamp the XZ velocity to `max_speed`, leaving Y untouched.
    pub fn clamp_horizontal_speed(&mut self, max_speed: f32) {
        let horizontal = self.horizontal_velocity();
        if horizontal.length_squared() > max_speed * max_speed {
            let clamped = horizontal.normalize_or_zero() * max_speed;
            self.linear_velocity.x = clamped.x;
            self.linear_velocity.z = clamped.z;
        }
    }

    pub fn stop(&mut self) {
        self.linear_velocity = Vec3::ZERO;
        self.pending_force = Vec3::ZERO;
    }
}
