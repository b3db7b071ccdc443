// Local avoidance and destination arrival for crowds of bevy_ecs agents.
// See engine/manager.rs for the scheduling loop.

pub mod engine;
