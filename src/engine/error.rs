// Error types for the avoidance subsystem.
// None of these are fatal: the scheduler logs them and carries on.

use bevy_ecs::entity::Entity;
use thiserror::Error;

/// Problems loading or validating a `CrowdConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Why an entity could not join the avoidance manager.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("entity {0:?} no longer exists")]
    Stale(Entity),
    #[error("entity {0:?} has no movement contract (MeshAgent or PathAgent)")]
    MissingMovementContract(Entity),
    #[error("entity {0:?} has no Avoidance component")]
    MissingAvoidance(Entity),
    #[error("entity {0:?} has no Transform")]
    MissingTransform(Entity),
    #[error("entity {0:?} is already registered")]
    AlreadyRegistered(Entity),
}

/// Per-entity failure while applying a physics profile.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhysicsError {
    #[error("entity {0:?} no longer exists")]
    Stale(Entity),
    #[error("entity {0:?} has no movement contract (MeshAgent or PathAgent)")]
    MissingMovementContract(Entity),
}
