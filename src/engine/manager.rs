// Avoidance scheduler.
//
// Amortizes per-agent avoidance over host frames. The host calls `tick`
// once per frame; the manager alternates between two phases:
//
//   Idle      accumulate frame time until `cycle_interval` has passed, then
//             start a cycle (LOD refresh if due, grid rebuild, queue fill)
//   Draining  process at most `agents_per_cycle` queued agents per tick
//
// When the queue empties the cycle closes and its measured cost goes to the
// rate controller, which retunes both parameters.
//
// One manager per world. It is an ordinary value owned by the host loop, not
// a global; nothing stops a second instance, but two managers registering the
// same entities would fight over their arrival state.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use bevy_ecs::prelude::*;
use bevy_ecs::query::QueryState;
use glam::Vec3;
use log::{debug, warn};

use super::avoidance::{ArrivalTransition, Avoidance, NeighborSample};
use super::components::{Collider, MeshAgent, PathAgent, RigidBody, Transform};
use super::config::ManagerConfig;
use super::error::RegistrationError;
use super::lod::{LodTier, LodTiers};
use super::movement::{Backend, contract_mut};
use super::physics;
use super::pool::ScratchPool;
use super::rate::{RateAdjustment, RateController};
use super::spatial::SpatialGrid;

type AgentQuery = (
    &'static Transform,
    &'static mut Avoidance,
    Option<&'static mut MeshAgent>,
    Option<&'static mut PathAgent>,
    Option<&'static mut RigidBody>,
    Option<&'static mut Collider>,
);

type NeighborQuery = (&'static Transform, &'static Avoidance);

/// Query states shared by every agent visited in one tick.
struct AgentQueries {
    agents: QueryState<AgentQuery>,
    neighbors: QueryState<NeighborQuery>,
}

impl AgentQueries {
    fn new(world: &mut World) -> Self {
        Self {
            agents: world.query::<AgentQuery>(),
            neighbors: world.query::<NeighborQuery>(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    Draining,
}

/// Counts returned by `AvoidanceManager::statistics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AvoidanceStats {
    pub total: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    /// Agents still queued in the current cycle.
    pub pending: usize,
}

/// Outcome of one agent visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Processed,
    /// Unknown entity, or avoidance disabled after the arrival check.
    /// Does not count against the work budget.
    Skipped,
    /// Entity or one of its required components is gone.
    Stale,
}

pub struct AvoidanceManager {
    config: ManagerConfig,
    backends: HashMap<Entity, Backend>,
    agents: Vec<Entity>,
    grid: SpatialGrid,
    tiers: LodTiers,
    rate: RateController,
    viewpoint: Vec3,

    phase: SchedulerPhase,
    /// Simulation time, the sum of every `dt` passed to `tick`.
    clock: f32,
    idle_time: f32,
    last_lod_refresh: Option<f32>,
    cycles_completed: u64,
    pending: VecDeque<Entity>,
    cycle_cost: Duration,

    placements: ScratchPool<(Entity, Vec3)>,
    candidates: ScratchPool<Entity>,
    samples: ScratchPool<NeighborSample>,
}

impl AvoidanceManager {
    pub fn new(config: ManagerConfig) -> Self {
        let rate = RateController::new(
            config.rate.clone(),
            config.agents_processed_per_cycle,
            config.cycle_interval,
        );
        Self {
            grid: SpatialGrid::new(config.cell_size, config.max_agents_per_cell),
            tiers: LodTiers::default(),
            rate,
            viewpoint: Vec3::ZERO,
            backends: HashMap::new(),
            agents: Vec::new(),
            phase: SchedulerPhase::Idle,
            clock: 0.0,
            idle_time: 0.0,
            last_lod_refresh: None,
            cycles_completed: 0,
            pending: VecDeque::new(),
            cycle_cost: Duration::ZERO,
            placements: ScratchPool::default(),
            candidates: ScratchPool::default(),
            samples: ScratchPool::default(),
            config,
        }
    }

    // ========================================================================
    // REGISTRATION
    // ========================================================================

    /// Add `entity` to the registry. Returns false for duplicates and for
    /// entities that cannot take part in avoidance; the latter are logged.
    pub fn register(&mut self, world: &World, entity: Entity) -> bool {
        match self.try_register(world, entity) {
            Ok(()) => true,
            Err(RegistrationError::AlreadyRegistered(_)) => false,
            Err(err @ RegistrationError::Stale(_)) => {
                debug!("avoidance: {err}");
                false
            }
            Err(err) => {
                warn!("avoidance: {err}, agent excluded");
                false
            }
        }
    }

    /// `register` with the reason for a refusal.
    pub fn try_register(&mut self, world: &World, entity: Entity) -> Result<(), RegistrationError> {
        if self.backends.contains_key(&entity) {
            return Err(RegistrationError::AlreadyRegistered(entity));
        }
        if !world.entities().contains(entity) {
            return Err(RegistrationError::Stale(entity));
        }
        let backend = Backend::detect(world, entity)
            .ok_or(RegistrationError::MissingMovementContract(entity))?;
        if world.get::<Avoidance>(entity).is_none() {
            return Err(RegistrationError::MissingAvoidance(entity));
        }
        let position = world
            .get::<Transform>(entity)
            .map(|t| t.position)
            .ok_or(RegistrationError::MissingTransform(entity))?;

        self.backends.insert(entity, backend);
        self.agents.push(entity);
        self.tiers.insert(entity, self.classify(position));
        self.grid.insert(entity, position);
        debug!("avoidance: registered {:?} ({:?})", entity, backend);
        Ok(())
    }

    /// Remove `entity` from the registry, the tiers, the grid and the queue.
    pub fn unregister(&mut self, entity: Entity) -> bool {
        if self.backends.remove(&entity).is_none() {
            return false;
        }
        self.agents.retain(|&e| e != entity);
        self.tiers.remove(entity);
        self.grid.remove(entity);
        self.pending.retain(|&e| e != entity);
        true
    }

    /// Unregister a pooled agent and reset its avoidance state so it can be
    /// respawned. An arrived agent gets its collision profile and movement
    /// back.
    pub fn recycle(&mut self, world: &mut World, entity: Entity) -> bool {
        let backend = self.backends.get(&entity).copied();
        let removed = self.unregister(entity);

        let mut agents = world.query::<AgentQuery>();
        if let Ok((_, mut avoidance, mesh, path, mut body, mut collider)) = agents.get_mut(world, entity) {
            if avoidance.has_reached_destination() {
                physics::restore_collision_profile(collider.as_deref_mut(), body.as_deref_mut());
                let contract = backend
                    .and_then(|b| contract_mut(mesh.map(Mut::into_inner), path.map(Mut::into_inner), b));
                if let Some(contract) = contract {
                    contract.set_can_move(true);
                }
            }
            avoidance.reset();
        }
        removed
    }

    pub fn is_registered(&self, entity: Entity) -> bool {
        self.backends.contains_key(&entity)
    }

    pub fn backend_of(&self, entity: Entity) -> Option<Backend> {
        self.backends.get(&entity).copied()
    }

    /// Forget `entity` everywhere; used for references found stale mid-loop.
    fn prune(&mut self, entity: Entity) {
        if self.unregister(entity) {
            debug!("avoidance: pruned stale agent {:?}", entity);
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn statistics(&self) -> AvoidanceStats {
        AvoidanceStats {
            total: self.agents.len(),
            high: self.tiers.high.len(),
            medium: self.tiers.medium.len(),
            low: self.tiers.low.len(),
            pending: self.pending.len(),
        }
    }

    /// Reference point for LOD. Takes effect at the next tier refresh.
    pub fn set_viewpoint(&mut self, viewpoint: Vec3) {
        self.viewpoint = viewpoint;
    }

    pub fn viewpoint(&self) -> Vec3 {
        self.viewpoint
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    pub fn agents_per_cycle(&self) -> usize {
        self.rate.agents_per_cycle()
    }

    pub fn cycle_interval(&self) -> f32 {
        self.rate.cycle_interval()
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    pub fn tiers(&self) -> &LodTiers {
        &self.tiers
    }

    pub fn tier_of(&self, entity: Entity) -> Option<LodTier> {
        self.tiers.tier_of(entity)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // ========================================================================
    // SCHEDULING
    // ========================================================================

    /// Host-frame poll. Advances the simulation clock by `dt` seconds and
    /// does at most one work slice.
    pub fn tick(&mut self, world: &mut World, dt: f32) {
        let dt = dt.max(0.0);
        self.clock += dt;

        if self.phase == SchedulerPhase::Idle {
            self.idle_time += dt;
            if self.idle_time < self.rate.cycle_interval() {
                return;
            }
            self.idle_time = 0.0;
            let started = Instant::now();
            self.begin_cycle(world, false);
            self.cycle_cost = started.elapsed();
            self.phase = SchedulerPhase::Draining;
        }

        let started = Instant::now();
        self.drain_slice(world);
        self.cycle_cost += started.elapsed();

        if self.pending.is_empty() {
            self.finish_cycle();
        }
    }

    /// Reclassify, rebuild and visit every registered agent right now,
    /// ignoring the work budget and LOD sampling. Abandons a cycle in
    /// progress; its cost is not reported to the rate controller.
    pub fn force_update_all(&mut self, world: &mut World) {
        self.pending.clear();
        self.phase = SchedulerPhase::Idle;
        self.idle_time = 0.0;
        self.begin_cycle(world, true);
        self.pending.clear();

        let mut queries = AgentQueries::new(world);
        let mut all = self.candidates.acquire();
        all.extend(self.agents.iter().copied());
        for &entity in &all {
            if self.visit(world, &mut queries, entity) == Visit::Stale {
                self.prune(entity);
            }
        }
        self.candidates.release(all);
    }

    fn classify(&self, position: Vec3) -> LodTier {
        LodTier::classify(
            position.distance_squared(self.viewpoint),
            self.config.high_detail_distance,
            self.config.medium_detail_distance,
        )
    }

    /// Snapshot live positions, refresh tiers if due, rebuild the grid and
    /// queue this cycle's sample. `force` refreshes tiers unconditionally.
    fn begin_cycle(&mut self, world: &World, force: bool) {
        let mut placements = self.placements.acquire();
        let mut stale = self.candidates.acquire();
        for &entity in &self.agents {
            match world.get::<Transform>(entity) {
                Some(transform) => placements.push((entity, transform.position)),
                None => stale.push(entity),
            }
        }
        for &entity in &stale {
            self.prune(entity);
        }
        self.candidates.release(stale);

        let lod_due = match self.last_lod_refresh {
            Some(at) => self.clock - at >= self.config.lod_refresh_interval,
            None => true,
        };
        if force || lod_due {
            self.tiers.rebuild(
                placements.iter().copied(),
                self.viewpoint,
                self.config.high_detail_distance,
                self.config.medium_detail_distance,
            );
            self.last_lod_refresh = Some(self.clock);
        }

        self.grid.rebuild(placements.iter().copied());
        self.placements.release(placements);

        let mut sample = self.candidates.acquire();
        self.tiers.sample_into(self.cycles_completed, &mut sample);
        self.pending.clear();
        self.pending.extend(sample.iter().copied());
        self.candidates.release(sample);

        debug!(
            "avoidance cycle {}: {} agents, {} queued, {} cells",
            self.cycles_completed,
            self.agents.len(),
            self.pending.len(),
            self.grid.occupied_cells()
        );
    }

    /// Visit queued agents until the work budget is spent or the queue is empty.
    fn drain_slice(&mut self, world: &mut World) {
        if self.pending.is_empty() {
            return;
        }
        let budget = self.rate.agents_per_cycle();
        let mut queries = AgentQueries::new(world);
        let mut processed = 0;
        while processed < budget {
            let Some(entity) = self.pending.pop_front() else {
                break;
            };
            match self.visit(world, &mut queries, entity) {
                Visit::Processed => processed += 1,
                Visit::Skipped => {}
                Visit::Stale => self.prune(entity),
            }
        }
    }

    fn finish_cycle(&mut self) {
        let cost = std::mem::take(&mut self.cycle_cost);
        self.phase = SchedulerPhase::Idle;
        self.cycles_completed += 1;
        if self.rate.record_cycle(cost) != RateAdjustment::Unchanged {
            debug!(
                "avoidance cycle {} closed after {:.3} ms",
                self.cycles_completed,
                cost.as_secs_f64() * 1000.0
            );
        }
    }

    // ========================================================================
    // AGENT VISIT
    // ========================================================================

    fn visit(&mut self, world: &mut World, queries: &mut AgentQueries, entity: Entity) -> Visit {
        let Some(&backend) = self.backends.get(&entity) else {
            return Visit::Skipped;
        };
        let fallback = self.rate.cycle_interval();
        // Longest legitimate gap: a low tier agent at the slowest cadence.
        let max_elapsed = self.rate.max_cycle_interval() * LodTier::Low.stride() as f32;
        let now = self.clock;

        let (position, radius) = {
            let Ok((transform, mut avoidance, mesh, path, mut body, mut collider)) =
                queries.agents.get_mut(world, entity)
            else {
                return Visit::Stale;
            };
            let Some(contract) = contract_mut(mesh.map(Mut::into_inner), path.map(Mut::into_inner), backend)
            else {
                return Visit::Stale;
            };
            let position = transform.position;

            let elapsed = avoidance.mark_visit(now, fallback, max_elapsed);
            avoidance.update_cached_values(position, contract);
            let disable_collision = avoidance.disable_collision_at_destination;
            // Off while the collision policy is disabled; that profile stays put.
            let collision_active = avoidance.enabled;
            match avoidance.check_destination_status(contract, elapsed) {
                ArrivalTransition::Entered => {
                    debug!("avoidance: {:?} arrived", entity);
                    if let Some(body) = body.as_deref_mut() {
                        body.stop();
                    }
                    if disable_collision {
                        physics::set_arrival_profile(collider.as_deref_mut(), body.as_deref_mut());
                    }
                }
                ArrivalTransition::Left => {
                    debug!("avoidance: {:?} left its destination", entity);
                    if disable_collision && collision_active {
                        physics::restore_collision_profile(collider.as_deref_mut(), body.as_deref_mut());
                    }
                }
                ArrivalTransition::None => {}
            }

            if !avoidance.enabled {
                return Visit::Skipped;
            }
            if !avoidance.should_calculate_avoidance() {
                return Visit::Processed;
            }
            (position, avoidance.avoidance_radius())
        };

        let mut samples = self.samples.acquire();
        self.collect_neighbors(world, &mut queries.neighbors, entity, position, radius, &mut samples);

        if let Ok((_, mut avoidance, _, _, body, _)) = queries.agents.get_mut(world, entity) {
            avoidance.calculate_avoidance_from_neighbors(&samples);
            if let Some(mut body) = body {
                avoidance.apply_avoidance(&mut body);
            }
        }
        self.samples.release(samples);
        Visit::Processed
    }

    /// Snapshot every other agent within `radius` of `position`.
    fn collect_neighbors(
        &mut self,
        world: &World,
        neighbors: &mut QueryState<NeighborQuery>,
        entity: Entity,
        position: Vec3,
        radius: f32,
        out: &mut Vec<NeighborSample>,
    ) {
        let mut candidates = self.candidates.acquire();
        self.grid.query_excluding(entity, position, radius, &mut candidates);
        let radius_sq = radius * radius;
        for &other in &candidates {
            // Candidates despawned since the rebuild simply fail the lookup.
            if let Ok((transform, avoidance)) = neighbors.get(world, other) {
                if transform.position.distance_squared(position) <= radius_sq {
                    out.push(NeighborSample::of(other, transform.position, avoidance));
                }
            }
        }
        self.candidates.release(candidates);
    }
}
