// Engine module - crowd local avoidance
// Scheduler, per-agent arrival state and the physics profile they drive

pub mod avoidance;
pub mod components;
pub mod config;
pub mod error;
pub mod lod;
pub mod manager;
pub mod movement;
pub mod physics;
pub mod pool;
pub mod rate;
pub mod spatial;
pub mod systems;

// Re-export commonly used items
pub use avoidance::{ArrivalState, ArrivalTransition, Avoidance, NeighborSample};
pub use components::*;
pub use config::{AgentTuning, CrowdConfig, ManagerConfig, PhysicsConfig, RateConfig};
pub use error::{ConfigError, PhysicsError, RegistrationError};
pub use lod::{LodTier, LodTiers};
pub use manager::{AvoidanceManager, AvoidanceStats, SchedulerPhase};
pub use movement::{Backend, MovementContract};
pub use physics::{CollisionPolicy, PhysicsProfileManager, integrate};
pub use rate::{RateAdjustment, RateController};
pub use spatial::SpatialGrid;
pub use systems::{mesh_navigation_system, path_navigation_system};
