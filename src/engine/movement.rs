// Movement contract: the surface a pathfinding backend exposes to the
// avoidance subsystem. Route computation itself happens elsewhere.
//
// Two backends exist (navmesh-style and grid A*-style). Which one an entity
// uses is detected once at registration and cached as a `Backend`.

use bevy_ecs::prelude::*;
use glam::Vec3;

use super::components::{MeshAgent, PathAgent};

/// Capabilities the avoidance subsystem needs from a movement backend.
///
/// The live position is read from `Transform`, not from the contract.
/// `destination() == Vec3::ZERO` means no destination is set.
pub trait MovementContract {
    fn destination(&self) -> Vec3;
    fn set_destination(&mut self, destination: Vec3);
    fn reached_destination(&self) -> bool;
    fn velocity(&self) -> Vec3;
    fn set_velocity(&mut self, velocity: Vec3);
    fn can_move(&self) -> bool;
    fn set_can_move(&mut self, can_move: bool);

    /// Drop the current destination and stand still.
    fn cancel_destination(&mut self) {
        self.set_destination(Vec3::ZERO);
        self.set_velocity(Vec3::ZERO);
    }
}

impl MovementContract for MeshAgent {
    fn destination(&self) -> Vec3 {
        self.destination
    }

    fn set_destination(&mut self, destination: Vec3) {
        self.destination = destination;
        self.reached = false;
    }

    fn reached_destination(&self) -> bool {
        self.reached
    }

    fn velocity(&self) -> Vec3 {
        self.velocity
    }

    fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = velocity;
    }

    fn can_move(&self) -> bool {
        self.can_move
    }

    fn set_can_move(&mut self, can_move: bool) {
        self.can_move = can_move;
    }
}

impl MovementContract for PathAgent {
    fn destination(&self) -> Vec3 {
        self.destination
    }

    fn set_destination(&mut self, destination: Vec3) {
        self.destination = destination;
        self.reached = false;
    }

    fn reached_destination(&self) -> bool {
        self.reached
    }

    fn velocity(&self) -> Vec3 {
        self.velocity
    }

    fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = velocity;
    }

    fn can_move(&self) -> bool {
        self.can_move
    }

    fn set_can_move(&mut self, can_move: bool) {
        self.can_move = can_move;
    }
}

/// Which movement-contract component an entity carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Mesh,
    Path,
}

impl Backend {
    /// Capability check for `entity`. `None` if it has no movement contract
    /// or no longer exists. A mesh contract wins if both are present.
    pub fn detect(world: &World, entity: Entity) -> Option<Backend> {
        if world.get::<MeshAgent>(entity).is_some() {
            Some(Backend::Mesh)
        } else if world.get::<PathAgent>(entity).is_some() {
            Some(Backend::Path)
        } else {
            None
        }
    }
}

/// Borrow the movement contract of `entity` through its cached backend.
pub fn contract_mut<'w>(
    mesh: Option<&'w mut MeshAgent>,
    path: Option<&'w mut PathAgent>,
    backend: Backend,
) -> Option<&'w mut dyn MovementContract> {
    match backend {
        Backend::Mesh => mesh.map(|m| m as &mut dyn MovementContract),
        Backend::Path => path.map(|p| p as &mut dyn MovementContract),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::components::Transform;

    #[test]
    fn detects_backend_once_per_entity() {
        let mut world = World::new();
        let mesh = world.spawn((Transform::default(), MeshAgent::default())).id();
        let path = world.spawn((Transform::default(), PathAgent::default())).id();
        let bare = world.spawn(Transform::default()).id();

        assert_eq!(Backend::detect(&world, mesh), Some(Backend::Mesh));
        assert_eq!(Backend::detect(&world, path), Some(Backend::Path));
        assert_eq!(Backend::detect(&world, bare), None);

        world.despawn(path);
        assert_eq!(Backend::detect(&world, path), None);
    }

    #[test]
    fn set_destination_clears_reached_flag() {
        let mut agent = PathAgent {
            reached: true,
            ..Default::default()
        };
        agent.set_destination(Vec3::new(1.0, 0.0, 2.0));
        assert!(!agent.reached_destination());
        assert_eq!(agent.destination(), Vec3::new(1.0, 0.0, 2.0));

        agent.velocity = Vec3::X;
        agent.cancel_destination();
        assert_eq!(agent.destination(), Vec3::ZERO);
        assert_eq!(agent.velocity(), Vec3::ZERO);
    }
}
