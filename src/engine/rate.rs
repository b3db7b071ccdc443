// Adaptive throughput control for the avoidance scheduler.
//
// A step controller, not PID: once a window of cycle costs is full, the
// average is compared against the frame budget and the two rate parameters
// move by one fixed step each. A deadband between `budget * relax_ratio` and
// `budget` leaves the parameters alone, so a cost hovering at the budget does
// not make them oscillate.

use std::collections::VecDeque;
use std::time::Duration;

use log::{info, warn};

use super::config::RateConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateAdjustment {
    /// Window not full yet, or average inside the deadband.
    Unchanged,
    /// Over budget: fewer agents per slice, longer interval.
    Throttled,
    /// Well under budget: more agents per slice, shorter interval.
    Relaxed,
}

pub struct RateController {
    config: RateConfig,
    samples: VecDeque<Duration>,
    agents_per_cycle: usize,
    cycle_interval: f32,
}

impl RateController {
    /// Inverted or degenerate bounds in `config` are repaired (with a
    /// warning) rather than rejected.
    pub fn new(mut config: RateConfig, agents_per_cycle: usize, cycle_interval: f32) -> Self {
        normalize_bounds(&mut config);
        let mut controller = Self {
            samples: VecDeque::with_capacity(config.window),
            agents_per_cycle,
            cycle_interval,
            config,
        };
        controller.clamp();
        controller
    }

    fn clamp(&mut self) {
        let c = &self.config;
        self.agents_per_cycle = self
            .agents_per_cycle
            .clamp(c.min_agents_per_cycle, c.max_agents_per_cycle);
        self.cycle_interval = self
            .cycle_interval
            .clamp(c.min_cycle_interval, c.max_cycle_interval);
    }

    /// Upper bound on `cycle_interval()`.
    pub fn max_cycle_interval(&self) -> f32 {
        self.config.max_cycle_interval
    }

    pub fn agents_per_cycle(&self) -> usize {
        self.agents_per_cycle
    }

    pub fn cycle_interval(&self) -> f32 {
        self.cycle_interval
    }

    /// Mean of the samples collected since the last adjustment.
    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }

    /// Feed the measured cost of one finished cycle.
    pub fn record_cycle(&mut self, cost: Duration) -> RateAdjustment {
        self.samples.push_back(cost);
        if self.samples.len() < self.config.window {
            return RateAdjustment::Unchanged;
        }

        let average = self.average().unwrap_or_default();
        self.samples.clear();

        let budget = self.config.frame_budget();
        let relax_below = budget.mul_f32(self.config.relax_ratio);
        let adjustment = if average > budget {
            self.agents_per_cycle = self.agents_per_cycle.saturating_sub(self.config.agent_step);
            self.cycle_interval += self.config.interval_step;
            RateAdjustment::Throttled
        } else if average < relax_below {
            self.agents_per_cycle += self.config.agent_step;
            self.cycle_interval -= self.config.interval_step;
            RateAdjustment::Relaxed
        } else {
            RateAdjustment::Unchanged
        };
        self.clamp();

        if adjustment != RateAdjustment::Unchanged {
            info!(
                "avoidance rate {:?}: avg {:.2} ms -> {} agents/slice, {:.2}s interval",
                adjustment,
                average.as_secs_f64() * 1000.0,
                self.agents_per_cycle,
                self.cycle_interval
            );
        }
        adjustment
    }
}

/// Make `clamp` safe: min >= 1 agent, max >= min, no NaN intervals.
fn normalize_bounds(config: &mut RateConfig) {
    let min_agents = config.min_agents_per_cycle.max(1);
    let max_agents = config.max_agents_per_cycle.max(min_agents);
    let min_interval = config.min_cycle_interval.max(0.0);
    let max_interval = config.max_cycle_interval.max(min_interval);
    let repaired = min_agents != config.min_agents_per_cycle
        || max_agents != config.max_agents_per_cycle
        || min_interval != config.min_cycle_interval
        || max_interval != config.max_cycle_interval;
    if repaired {
        warn!(
            "avoidance rate bounds repaired: agents {}..={}, interval {:.2}..={:.2}s",
            min_agents, max_agents, min_interval, max_interval
        );
    }
    config.min_agents_per_cycle = min_agents;
    config.max_agents_per_cycle = max_agents;
    config.min_cycle_interval = min_interval;
    config.max_cycle_interval = max_interval;
}
