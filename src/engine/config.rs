// Tunables for the avoidance subsystem, loadable from TOML.
// Every field has a default so a partial file (or none at all) is valid.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::error::ConfigError;

/// Top-level configuration: one section per subsystem.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CrowdConfig {
    pub manager: ManagerConfig,
    pub agent: AgentTuning,
    pub physics: PhysicsConfig,
}

impl CrowdConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.manager;
        if m.cell_size <= 0.0 {
            return Err(invalid("manager.cell_size must be positive"));
        }
        if m.max_agents_per_cell == 0 {
            return Err(invalid("manager.max_agents_per_cell must be at least 1"));
        }
        if m.cycle_interval <= 0.0 || m.lod_refresh_interval <= 0.0 {
            return Err(invalid("manager intervals must be positive"));
        }
        if m.high_detail_distance < 0.0 || m.medium_detail_distance < m.high_detail_distance {
            return Err(invalid(
                "manager.medium_detail_distance must be >= high_detail_distance >= 0",
            ));
        }
        let r = &m.rate;
        if r.window == 0 {
            return Err(invalid("manager.rate.window must be at least 1"));
        }
        if r.min_agents_per_cycle == 0 || r.max_agents_per_cycle < r.min_agents_per_cycle {
            return Err(invalid("manager.rate agent bounds are inconsistent"));
        }
        if r.min_cycle_interval <= 0.0 || r.max_cycle_interval < r.min_cycle_interval {
            return Err(invalid("manager.rate interval bounds are inconsistent"));
        }
        if !(0.0..=1.0).contains(&r.relax_ratio) {
            return Err(invalid("manager.rate.relax_ratio must be within [0, 1]"));
        }

        let a = &self.agent;
        if a.stop_distance < 0.0 || a.stop_distance > a.destination_radius {
            return Err(invalid(
                "agent.stop_distance must be within [0, agent.destination_radius]",
            ));
        }
        if a.stabilization_threshold < 0.0 {
            return Err(invalid("agent.stabilization_threshold must not be negative"));
        }
        if self.physics.batch_size == 0 {
            return Err(invalid("physics.batch_size must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}

/// Scheduler, grid and LOD settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Work budget: agents processed per host tick before yielding.
    pub agents_processed_per_cycle: usize,
    /// Seconds between the end of one cycle and the start of the next.
    pub cycle_interval: f32,
    /// Grid cell side length; sized so an avoidance radius fits in about one cell.
    pub cell_size: f32,
    pub max_agents_per_cell: usize,
    /// Seconds between LOD reclassifications.
    pub lod_refresh_interval: f32,
    pub high_detail_distance: f32,
    pub medium_detail_distance: f32,
    pub rate: RateConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            agents_processed_per_cycle: 10,
            cycle_interval: 0.1,
            cell_size: 4.0,
            max_agents_per_cell: 50,
            lod_refresh_interval: 1.0,
            high_detail_distance: 30.0,
            medium_detail_distance: 60.0,
            rate: RateConfig::default(),
        }
    }
}

/// Bounds and steps for the adaptive throughput controller.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Number of cycles averaged before each adjustment.
    pub window: usize,
    /// Target cost of one cycle, in milliseconds.
    pub frame_budget_ms: f32,
    /// Below `frame_budget_ms * relax_ratio` the controller speeds back up.
    /// Between that and the budget nothing changes.
    pub relax_ratio: f32,
    pub agent_step: usize,
    pub interval_step: f32,
    pub min_agents_per_cycle: usize,
    pub max_agents_per_cycle: usize,
    pub min_cycle_interval: f32,
    pub max_cycle_interval: f32,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            window: 10,
            frame_budget_ms: 16.0,
            relax_ratio: 0.5,
            agent_step: 1,
            interval_step: 0.05,
            min_agents_per_cycle: 1,
            max_agents_per_cycle: 10,
            min_cycle_interval: 0.1,
            max_cycle_interval: 0.5,
        }
    }
}

impl RateConfig {
    pub fn frame_budget(&self) -> Duration {
        Duration::from_secs_f32(self.frame_budget_ms.max(0.0) / 1000.0)
    }
}

/// Per-agent defaults used when spawning `Avoidance` components.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct AgentTuning {
    pub avoidance_radius: f32,
    pub avoidance_force: f32,
    pub max_avoidance_speed: f32,
    /// Slow-down zone around the destination.
    pub destination_radius: f32,
    /// Hard-stop zone; never larger than `destination_radius`.
    pub stop_distance: f32,
    /// Continuous dwell time in the stop zone before arrival latches.
    pub stabilization_threshold: f32,
    /// Extra attenuation of neighbor weights inside the destination radius.
    pub destination_damping: f32,
    pub disable_collision_at_destination: bool,
}

impl Default for AgentTuning {
    fn default() -> Self {
        Self {
            avoidance_radius: 2.0,
            avoidance_force: 5.0,
            max_avoidance_speed: 8.0,
            destination_radius: 2.0,
            stop_distance: 1.5,
            stabilization_threshold: 0.5,
            destination_damping: 0.5,
            disable_collision_at_destination: true,
        }
    }
}

/// Collision-toggle policy and the body profile it installs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    pub collision_enabled: bool,
    /// Entities reconfigured per `PhysicsProfileManager::tick`.
    pub batch_size: usize,
    pub collider_radius: f32,
    pub collider_height: f32,
    pub collider_center_y: f32,
    pub body_mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    /// Floor applied to `PathAgent::max_speed` when collisions are enabled.
    pub min_path_speed: f32,
    pub path_slowdown_distance: f32,
    pub path_waypoint_distance: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            collision_enabled: true,
            batch_size: 25,
            collider_radius: 0.5,
            collider_height: 2.0,
            collider_center_y: 1.0,
            body_mass: 1.0,
            linear_damping: 8.0,
            angular_damping: 10.0,
            min_path_speed: 3.0,
            path_slowdown_distance: 3.0,
            path_waypoint_distance: 2.0,
        }
    }
}
