// Per-agent local avoidance and destination-arrival state.
//
// The agent never touches other agents: the manager hands it copies of its
// neighbours' cached state (`NeighborSample`) and it only mutates itself,
// its own movement contract and its own rigid body.
//
// Arrival is debounced: an agent must stay inside the stop zone for
// `stabilization_threshold` seconds of continuous visits before it latches
// as arrived, so a distance estimate hovering on the boundary cannot flicker
// the collision profile every cycle.

use bevy_ecs::prelude::*;
use glam::Vec3;

use super::components::RigidBody;
use super::config::AgentTuning;
use super::movement::MovementContract;

/// Neighbours closer than this are ignored (undefined push direction).
pub const MIN_DISTANCE: f32 = 0.1;
/// Directions shorter than this produce no force.
pub const MIN_AVOIDANCE_MAGNITUDE: f32 = 0.1;
/// Destination moves larger than this count as a redirect.
pub const REDIRECT_EPSILON: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArrivalState {
    #[default]
    Approaching,
    /// Inside the stop zone, waiting for the dwell time to elapse.
    Stabilizing,
    Arrived,
}

/// Edge reported by `check_destination_status` so the caller can update
/// the physical representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrivalTransition {
    None,
    Entered,
    Left,
}

/// Snapshot of a neighbour, copied out of the world before the agent runs.
#[derive(Debug, Clone, Copy)]
pub struct NeighborSample {
    pub entity: Entity,
    pub position: Vec3,
    pub has_reached_destination: bool,
    pub disables_collision_at_destination: bool,
}

impl NeighborSample {
    /// `position` is the neighbour's live position, not its cached one.
    pub fn of(entity: Entity, position: Vec3, avoidance: &Avoidance) -> Self {
        Self {
            entity,
            position,
            has_reached_destination: avoidance.has_reached_destination(),
            disables_collision_at_destination: avoidance.disable_collision_at_destination,
        }
    }

    /// Arrived agents that drop collision are invisible to avoidance.
    fn is_ignored(&self) -> bool {
        self.has_reached_destination && self.disables_collision_at_destination
    }
}

#[derive(Component, Debug, Clone)]
pub struct Avoidance {
    avoidance_radius: f32,
    avoidance_force: f32,
    max_avoidance_speed: f32,
    destination_radius: f32,
    stop_distance: f32,
    pub stabilization_threshold: f32,
    pub destination_damping: f32,
    pub disable_collision_at_destination: bool,
    /// Cleared by the physics profile manager when collisions are off.
    pub enabled: bool,

    cached_position: Vec3,
    cached_destination: Option<Vec3>,
    distance_to_destination: f32,
    state: ArrivalState,
    time_at_destination: f32,
    avoidance_direction: Vec3,
    last_visit: Option<f32>,
    /// Destination changed while arrived; consumed by the next status check.
    redirect_pending: bool,
}

impl Default for Avoidance {
    fn default() -> Self {
        Self::new(&AgentTuning::default())
    }
}

impl Avoidance {
    pub fn new(tuning: &AgentTuning) -> Self {
        let destination_radius = tuning.destination_radius.max(0.0);
        Self {
            avoidance_radius: tuning.avoidance_radius.max(0.0),
            avoidance_force: tuning.avoidance_force.max(0.0),
            max_avoidance_speed: tuning.max_avoidance_speed.max(0.0),
            destination_radius,
            stop_distance: tuning.stop_distance.clamp(0.0, destination_radius),
            stabilization_threshold: tuning.stabilization_threshold.max(0.0),
            destination_damping: tuning.destination_damping.clamp(0.0, 1.0),
            disable_collision_at_destination: tuning.disable_collision_at_destination,
            enabled: true,
            cached_position: Vec3::ZERO,
            cached_destination: None,
            distance_to_destination: f32::INFINITY,
            state: ArrivalState::Approaching,
            time_at_destination: 0.0,
            avoidance_direction: Vec3::ZERO,
            last_visit: None,
            redirect_pending: false,
        }
    }

    /// Zero all timers, flags and cached values (pooled agents).
    pub fn reset(&mut self) {
        self.cached_position = Vec3::ZERO;
        self.cached_destination = None;
        self.distance_to_destination = f32::INFINITY;
        self.state = ArrivalState::Approaching;
        self.time_at_destination = 0.0;
        self.avoidance_direction = Vec3::ZERO;
        self.last_visit = None;
        self.redirect_pending = false;
        self.enabled = true;
    }

    // ========================================================================
    // CACHED STATE
    // ========================================================================

    /// Refresh position and destination from the live agent.
    ///
    /// A changed destination restarts the dwell timer; if the agent was
    /// arrived, the next status check leaves the latch.
    pub fn update_cached_values(&mut self, position: Vec3, contract: &dyn MovementContract) {
        self.cached_position = position;
        let destination = contract.destination();
        let destination = (destination != Vec3::ZERO).then_some(destination);

        let redirected = match (self.cached_destination, destination) {
            (Some(old), Some(new)) => old.distance_squared(new) > REDIRECT_EPSILON * REDIRECT_EPSILON,
            (None, None) => false,
            _ => true,
        };
        if redirected {
            self.time_at_destination = 0.0;
            self.redirect_pending = self.state == ArrivalState::Arrived;
        }
        self.cached_destination = destination;
        self.distance_to_destination = match destination {
            Some(d) => position.distance(d),
            None => f32::INFINITY,
        };
    }

    pub fn cached_position(&self) -> Vec3 {
        self.cached_position
    }

    pub fn cached_destination(&self) -> Option<Vec3> {
        self.cached_destination
    }

    pub fn distance_to_destination(&self) -> f32 {
        self.distance_to_destination
    }

    /// Seconds since the previous visit at simulation time `now`, at most
    /// `max_elapsed`, then remember `now`. The first visit reports `fallback`.
    pub fn mark_visit(&mut self, now: f32, fallback: f32, max_elapsed: f32) -> f32 {
        let elapsed = match self.last_visit {
            Some(prev) => (now - prev).max(0.0),
            None => fallback,
        };
        self.last_visit = Some(now);
        elapsed.min(max_elapsed.max(0.0))
    }

    // ========================================================================
    // ARRIVAL STATE MACHINE
    // ========================================================================

    pub fn state(&self) -> ArrivalState {
        self.state
    }

    /// Latched only after the stabilization dwell.
    pub fn has_reached_destination(&self) -> bool {
        self.state == ArrivalState::Arrived
    }

    pub fn time_at_destination(&self) -> f32 {
        self.time_at_destination
    }

    fn in_stop_zone(&self, contract: &dyn MovementContract) -> bool {
        self.distance_to_destination <= self.stop_distance || contract.reached_destination()
    }

    /// Advance the arrival state machine by `elapsed` seconds.
    pub fn check_destination_status(
        &mut self,
        contract: &mut dyn MovementContract,
        elapsed: f32,
    ) -> ArrivalTransition {
        let redirected = std::mem::take(&mut self.redirect_pending);
        if redirected || !self.in_stop_zone(contract) {
            self.time_at_destination = 0.0;
            return self.leave_destination(contract);
        }

        self.time_at_destination += elapsed.max(0.0);
        match self.state {
            ArrivalState::Arrived => ArrivalTransition::None,
            ArrivalState::Approaching | ArrivalState::Stabilizing => {
                if self.time_at_destination >= self.stabilization_threshold {
                    self.enter_arrived(contract);
                    ArrivalTransition::Entered
                } else {
                    self.state = ArrivalState::Stabilizing;
                    ArrivalTransition::None
                }
            }
        }
    }

    fn enter_arrived(&mut self, contract: &mut dyn MovementContract) {
        self.state = ArrivalState::Arrived;
        self.avoidance_direction = Vec3::ZERO;
        contract.set_can_move(false);
        contract.set_velocity(Vec3::ZERO);
    }

    fn leave_destination(&mut self, contract: &mut dyn MovementContract) -> ArrivalTransition {
        let was_arrived = self.state == ArrivalState::Arrived;
        self.state = ArrivalState::Approaching;
        if was_arrived {
            contract.set_can_move(true);
            ArrivalTransition::Left
        } else {
            ArrivalTransition::None
        }
    }

    /// Latch arrival immediately, skipping the dwell.
    pub fn force_stop(&mut self, contract: &mut dyn MovementContract) -> ArrivalTransition {
        self.time_at_destination = self.time_at_destination.max(self.stabilization_threshold);
        self.redirect_pending = false;
        if self.state == ArrivalState::Arrived {
            return ArrivalTransition::None;
        }
        self.enter_arrived(contract);
        ArrivalTransition::Entered
    }

    /// False for disabled agents and for arrived agents that drop collision.
    pub fn should_calculate_avoidance(&self) -> bool {
        self.enabled && !(self.has_reached_destination() && self.disable_collision_at_destination)
    }

    // ========================================================================
    // AVOIDANCE FORCE
    // ========================================================================

    /// Fraction in [0, 1] applied near the destination; 1 outside the
    /// destination radius.
    pub fn destination_damping_factor(&self) -> f32 {
        if self.destination_radius > 0.0 && self.distance_to_destination < self.destination_radius {
            (self.distance_to_destination / self.destination_radius).clamp(0.0, 1.0)
                * self.destination_damping
        } else {
            1.0
        }
    }

    /// Upper bound on avoidance-driven horizontal speed right now.
    pub fn speed_limit(&self) -> f32 {
        self.max_avoidance_speed * self.destination_damping_factor()
    }

    /// Recompute `avoidance_direction` from neighbour snapshots.
    ///
    /// Linear falloff, 1 at contact and 0 at `avoidance_radius`; the sum is
    /// normalized if it exceeds unit length. Planar: Y is always 0.
    pub fn calculate_avoidance_from_neighbors(&mut self, neighbors: &[NeighborSample]) -> Vec3 {
        let mut direction = Vec3::ZERO;
        let radius = self.avoidance_radius;
        let damping = self.destination_damping_factor();

        if radius > MIN_DISTANCE {
            for neighbor in neighbors {
                if neighbor.is_ignored() {
                    continue;
                }
                let mut away = self.cached_position - neighbor.position;
                away.y = 0.0;
                let dist = away.length();
                if dist > MIN_DISTANCE && dist < radius {
                    let weight = (radius - dist) / radius * damping;
                    direction += away / dist * weight;
                }
            }
        }

        if direction.length_squared() > 1.0 {
            direction = direction.normalize();
        }
        self.avoidance_direction = direction;
        direction
    }

    pub fn avoidance_direction(&self) -> Vec3 {
        self.avoidance_direction
    }

    /// Direction scaled by force, clamped to `speed_limit()`.
    pub fn avoidance_velocity(&self) -> Vec3 {
        let velocity = self.avoidance_direction * self.avoidance_force;
        let limit = self.speed_limit();
        if velocity.length_squared() > limit * limit {
            velocity.normalize_or_zero() * limit
        } else {
            velocity
        }
    }

    /// Push the body along the avoidance direction and clamp its XZ speed.
    /// Returns false when the direction was too small to act on.
    pub fn apply_avoidance(&self, body: &mut RigidBody) -> bool {
        if self.avoidance_direction.length_squared()
            < MIN_AVOIDANCE_MAGNITUDE * MIN_AVOIDANCE_MAGNITUDE
        {
            return false;
        }
        body.add_force(self.avoidance_velocity());
        body.clamp_horizontal_speed(self.speed_limit());
        true
    }

    // ========================================================================
    // TUNING
    // ========================================================================

    pub fn avoidance_radius(&self) -> f32 {
        self.avoidance_radius
    }

    pub fn set_avoidance_radius(&mut self, radius: f32) {
        self.avoidance_radius = radius.max(0.0);
    }

    pub fn avoidance_force(&self) -> f32 {
        self.avoidance_force
    }

    pub fn set_avoidance_force(&mut self, force: f32) {
        self.avoidance_force = force.max(0.0);
    }

    pub fn max_avoidance_speed(&self) -> f32 {
        self.max_avoidance_speed
    }

    pub fn set_max_avoidance_speed(&mut self, speed: f32) {
        self.max_avoidance_speed = speed.max(0.0);
    }

    pub fn destination_radius(&self) -> f32 {
        self.destination_radius
    }

    /// Shrinking the destination radius below the stop distance pulls the
    /// stop distance in with it.
    pub fn set_destination_radius(&mut self, radius: f32) {
        self.destination_radius = radius.max(0.0);
        self.stop_distance = self.stop_distance.min(self.destination_radius);
    }

    pub fn stop_distance(&self) -> f32 {
        self.stop_distance
    }

    /// Clamped to `[0, destination_radius]`.
    pub fn set_stop_distance(&mut self, distance: f32) {
        self.stop_distance = distance.clamp(0.0, self.destination_radius);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::components::PathAgent;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn tuning() -> AgentTuning {
        AgentTuning {
            avoidance_radius: 2.0,
            stop_distance: 1.5,
            destination_radius: 2.0,
            stabilization_threshold: 0.5,
            ..AgentTuning::default()
        }
    }

    fn contract_to(destination: Vec3) -> PathAgent {
        PathAgent {
            destination,
            ..PathAgent::default()
        }
    }

    fn sample(world: &mut World, position: Vec3) -> NeighborSample {
        NeighborSample {
            entity: world.spawn_empty().id(),
            position,
            has_reached_destination: false,
            disables_collision_at_destination: true,
        }
    }

    #[test]
    fn arrives_after_three_cycles_in_stop_zone() {
        let mut agent = Avoidance::new(&tuning());
        let mut nav = contract_to(Vec3::new(0.0, 0.0, 10.0));

        agent.update_cached_values(Vec3::ZERO, &nav);
        assert_eq!(agent.check_destination_status(&mut nav, 0.2), ArrivalTransition::None);
        assert_eq!(agent.state(), ArrivalState::Approaching);

        agent.update_cached_values(Vec3::new(0.0, 0.0, 9.0), &nav);
        assert_eq!(agent.check_destination_status(&mut nav, 0.2), ArrivalTransition::None);
        assert_eq!(agent.state(), ArrivalState::Stabilizing);
        assert_eq!(agent.check_destination_status(&mut nav, 0.2), ArrivalTransition::None);
        assert!(!agent.has_reached_destination());
        assert_eq!(agent.check_destination_status(&mut nav, 0.2), ArrivalTransition::Entered);

        assert!(agent.has_reached_destination());
        assert!(!nav.can_move);
        assert_eq!(nav.velocity, Vec3::ZERO);
        assert!(!agent.should_calculate_avoidance());
    }

    #[test]
    fn oscillating_agent_never_latches() {
        let mut agent = Avoidance::new(&tuning());
        let mut nav = contract_to(Vec3::new(0.0, 0.0, 10.0));

        for i in 0..50 {
            // Inside the zone for 0.4s, then out for one visit.
            let z = if i % 3 == 2 { 8.0 } else { 9.0 };
            agent.update_cached_values(Vec3::new(0.0, 0.0, z), &nav);
            agent.check_destination_status(&mut nav, 0.2);
            assert!(!agent.has_reached_destination(), "latched at visit {i}");
        }
        assert!(nav.can_move);
    }

    #[test]
    fn backend_reached_flag_counts_as_in_zone() {
        let mut agent = Avoidance::new(&tuning());
        let mut nav = contract_to(Vec3::new(0.0, 0.0, 10.0));
        nav.reached = true;
        agent.update_cached_values(Vec3::ZERO, &nav);
        assert_eq!(agent.check_destination_status(&mut nav, 0.6), ArrivalTransition::Entered);
    }

    #[test]
    fn redirect_leaves_arrived_state() {
        let mut agent = Avoidance::new(&tuning());
        let mut nav = contract_to(Vec3::new(0.0, 0.0, 1.0));
        agent.update_cached_values(Vec3::ZERO, &nav);
        agent.check_destination_status(&mut nav, 1.0);
        assert!(agent.has_reached_destination());

        // New destination that is still close: the redirect alone unlatches.
        nav.set_destination(Vec3::new(0.5, 0.0, 0.5));
        agent.update_cached_values(Vec3::ZERO, &nav);
        assert_eq!(agent.check_destination_status(&mut nav, 0.1), ArrivalTransition::Left);
        assert_eq!(agent.state(), ArrivalState::Approaching);
        assert!(nav.can_move);

        // Far destination keeps the agent approaching.
        nav.set_destination(Vec3::new(0.0, 0.0, 20.0));
        agent.update_cached_values(Vec3::ZERO, &nav);
        assert_eq!(agent.check_destination_status(&mut nav, 0.1), ArrivalTransition::None);
        assert_eq!(agent.time_at_destination(), 0.0);
    }

    #[test]
    fn force_stop_latches_and_sticks() {
        let mut agent = Avoidance::new(&tuning());
        let mut nav = contract_to(Vec3::new(0.0, 0.0, 1.0));
        agent.update_cached_values(Vec3::ZERO, &nav);

        assert_eq!(agent.force_stop(&mut nav), ArrivalTransition::Entered);
        assert!(!nav.can_move);
        assert_eq!(agent.check_destination_status(&mut nav, 0.1), ArrivalTransition::None);
        assert!(agent.has_reached_destination());
    }

    #[test]
    fn two_agents_push_apart_symmetrically() {
        let mut world = World::new();
        let mut a = Avoidance::new(&tuning());
        let mut b = Avoidance::new(&tuning());
        let nav = PathAgent::default();
        a.update_cached_values(Vec3::ZERO, &nav);
        b.update_cached_values(Vec3::new(0.0, 0.0, 0.5), &nav);

        let sa = sample(&mut world, b.cached_position());
        let sb = sample(&mut world, a.cached_position());
        let da = a.calculate_avoidance_from_neighbors(&[sa]);
        let db = b.calculate_avoidance_from_neighbors(&[sb]);

        assert!((da.z + 0.75).abs() < 1e-5);
        assert!((db.z - 0.75).abs() < 1e-5);
        assert_eq!(da.x, 0.0);
        assert_eq!(da.y, 0.0);
    }

    #[test]
    fn ignores_coincident_far_and_arrived_neighbours() {
        let mut world = World::new();
        let mut agent = Avoidance::new(&tuning());
        agent.update_cached_values(Vec3::ZERO, &PathAgent::default());

        let coincident = sample(&mut world, Vec3::new(0.05, 0.0, 0.0));
        let far = sample(&mut world, Vec3::new(3.0, 0.0, 0.0));
        let mut arrived = sample(&mut world, Vec3::new(1.0, 0.0, 0.0));
        arrived.has_reached_destination = true;

        assert_eq!(agent.calculate_avoidance_from_neighbors(&[]), Vec3::ZERO);
        assert_eq!(
            agent.calculate_avoidance_from_neighbors(&[coincident, far, arrived]),
            Vec3::ZERO
        );

        // Arrived neighbours that keep collision still count.
        arrived.disables_collision_at_destination = false;
        assert!(agent.calculate_avoidance_from_neighbors(&[arrived]).x < 0.0);
    }

    #[test]
    fn vertical_offset_does_not_steer() {
        let mut world = World::new();
        let mut agent = Avoidance::new(&tuning());
        agent.update_cached_values(Vec3::ZERO, &PathAgent::default());
        let above = sample(&mut world, Vec3::new(1.0, 5.0, 0.0));
        let dir = agent.calculate_avoidance_from_neighbors(&[above]);
        assert_eq!(dir.y, 0.0);
        assert!((dir.x + 0.5).abs() < 1e-5);
    }

    #[test]
    fn weights_fade_near_own_destination() {
        let mut world = World::new();
        let mut agent = Avoidance::new(&tuning());
        let nav = contract_to(Vec3::new(1.0, 0.0, 0.0));
        agent.update_cached_values(Vec3::ZERO, &nav);
        let neighbor = sample(&mut world, Vec3::new(0.0, 0.0, 1.0));

        // 1.0 / 2.0 of the way into the destination radius, damping 0.5.
        let dir = agent.calculate_avoidance_from_neighbors(&[neighbor]);
        assert!((dir.z + 0.5 * 0.5 * 0.5).abs() < 1e-5);
        assert!((agent.speed_limit() - 8.0 * 0.25).abs() < 1e-5);
    }

    #[test]
    fn force_output_is_bounded() {
        let mut world = World::new();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let mut agent = Avoidance::new(&AgentTuning {
                avoidance_force: rng.gen_range(0.0..50.0),
                max_avoidance_speed: rng.gen_range(0.0..10.0),
                ..tuning()
            });
            let dest = Vec3::new(rng.gen_range(-3.0..3.0), 0.0, rng.gen_range(-3.0..3.0));
            agent.update_cached_values(Vec3::ZERO, &contract_to(dest));
            let neighbors: Vec<_> = (0..rng.gen_range(0..12))
                .map(|_| {
                    let p = Vec3::new(rng.gen_range(-2.0..2.0), 0.0, rng.gen_range(-2.0..2.0));
                    sample(&mut world, p)
                })
                .collect();
            let dir = agent.calculate_avoidance_from_neighbors(&neighbors);
            assert!(dir.length() <= 1.0 + 1e-5);

            let mut body = RigidBody {
                linear_velocity: Vec3::new(rng.gen_range(-30.0..30.0), 2.0, rng.gen_range(-30.0..30.0)),
                ..RigidBody::default()
            };
            let limit = agent.speed_limit();
            assert!(agent.avoidance_velocity().length() <= limit + 1e-4);
            if agent.apply_avoidance(&mut body) {
                assert!(body.horizontal_velocity().length() <= limit + 1e-4);
                assert_eq!(body.linear_velocity.y, 2.0);
            }
        }
    }

    #[test]
    fn setters_keep_stop_distance_inside_destination_radius() {
        let mut agent = Avoidance::new(&tuning());
        agent.set_destination_radius(1.0);
        assert_eq!(agent.stop_distance(), 1.0);
        agent.set_stop_distance(5.0);
        assert_eq!(agent.stop_distance(), 1.0);
        agent.set_avoidance_radius(-3.0);
        assert_eq!(agent.avoidance_radius(), 0.0);
        agent.set_avoidance_force(-1.0);
        assert_eq!(agent.avoidance_force(), 0.0);
    }

    #[test]
    fn reset_clears_latch_and_timers() {
        let mut agent = Avoidance::new(&tuning());
        let mut nav = contract_to(Vec3::new(0.0, 0.0, 1.0));
        agent.update_cached_values(Vec3::ZERO, &nav);
        agent.mark_visit(3.0, 0.1, 1.0);
        agent.check_destination_status(&mut nav, 1.0);
        agent.enabled = false;

        agent.reset();
        assert_eq!(agent.state(), ArrivalState::Approaching);
        assert_eq!(agent.time_at_destination(), 0.0);
        assert_eq!(agent.cached_destination(), None);
        assert!(agent.enabled);
        assert_eq!(agent.mark_visit(5.0, 0.25, 1.0), 0.25);
    }

    #[test]
    fn long_gap_between_visits_does_not_skip_the_dwell() {
        let mut agent = Avoidance::new(&tuning());
        let mut nav = contract_to(Vec3::new(0.0, 0.0, 10.0));
        agent.update_cached_values(Vec3::new(0.0, 0.0, 9.0), &nav);

        assert_eq!(agent.mark_visit(1.0, 0.1, 0.3), 0.1);
        let elapsed = agent.mark_visit(11.0, 0.1, 0.3);
        assert_eq!(elapsed, 0.3);
        assert_eq!(agent.check_destination_status(&mut nav, elapsed), ArrivalTransition::None);
        assert_eq!(agent.state(), ArrivalState::Stabilizing);
        assert!(nav.can_move);

        let elapsed = agent.mark_visit(11.2, 0.1, 0.3);
        assert!((elapsed - 0.2).abs() < 1e-4);
        assert_eq!(agent.check_destination_status(&mut nav, elapsed), ArrivalTransition::Entered);
    }
}
