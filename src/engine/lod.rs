// Distance-based level-of-detail tiers.
//
// Tiers are recomputed on a slower cadence than the grid (default once per
// second). Far tiers are sampled sparsely each cycle:
//
//   High   every agent
//   Medium every 2nd agent
//   Low    every 4th agent
//
// The stride offset rotates with the cycle counter, so every agent in a
// sparse tier is eventually visited, but within one cycle the selection is
// positional, not fair.

use bevy_ecs::entity::Entity;
use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LodTier {
    High,
    Medium,
    Low,
}

impl LodTier {
    /// One out of every `stride()` agents in this tier is processed per cycle.
    pub fn stride(self) -> usize {
        match self {
            LodTier::High => 1,
            LodTier::Medium => 2,
            LodTier::Low => 4,
        }
    }

    /// Tier for an agent at squared distance `dist_sq` from the viewpoint.
    pub fn classify(dist_sq: f32, high_distance: f32, medium_distance: f32) -> LodTier {
        if dist_sq <= high_distance * high_distance {
            LodTier::High
        } else if dist_sq <= medium_distance * medium_distance {
            LodTier::Medium
        } else {
            LodTier::Low
        }
    }
}

/// Three disjoint agent lists, owned by the manager.
#[derive(Debug, Default)]
pub struct LodTiers {
    pub high: Vec<Entity>,
    pub medium: Vec<Entity>,
    pub low: Vec<Entity>,
}

impl LodTiers {
    pub fn clear(&mut self) {
        self.high.clear();
        self.medium.clear();
        self.low.clear();
    }

    /// Repartition `agents` by distance to `viewpoint`.
    pub fn rebuild<I>(&mut self, agents: I, viewpoint: Vec3, high_distance: f32, medium_distance: f32)
    where
        I: IntoIterator<Item = (Entity, Vec3)>,
    {
        self.clear();
        for (entity, pos) in agents {
            let tier = LodTier::classify(pos.distance_squared(viewpoint), high_distance, medium_distance);
            self.tier_mut(tier).push(entity);
        }
    }

    pub fn tier(&self, tier: LodTier) -> &[Entity] {
        match tier {
            LodTier::High => &self.high,
            LodTier::Medium => &self.medium,
            LodTier::Low => &self.low,
        }
    }

    fn tier_mut(&mut self, tier: LodTier) -> &mut Vec<Entity> {
        match tier {
            LodTier::High => &mut self.high,
            LodTier::Medium => &mut self.medium,
            LodTier::Low => &mut self.low,
        }
    }

    /// Place a newly registered agent without a full rebuild.
    pub fn insert(&mut self, entity: Entity, tier: LodTier) {
        if self.tier_of(entity).is_none() {
            self.tier_mut(tier).push(entity);
        }
    }

    pub fn tier_of(&self, entity: Entity) -> Option<LodTier> {
        [LodTier::High, LodTier::Medium, LodTier::Low]
            .into_iter()
            .find(|&t| self.tier(t).contains(&entity))
    }

    /// Drop `entity` from whichever tier holds it.
    pub fn remove(&mut self, entity: Entity) -> bool {
        for tier in [LodTier::High, LodTier::Medium, LodTier::Low] {
            let list = self.tier_mut(tier);
            if let Some(i) = list.iter().position(|&e| e == entity) {
                list.remove(i);
                return true;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push this cycle's sample of every tier onto `out`, high tier first.
    pub fn sample_into(&self, cycle: u64, out: &mut Vec<Entity>) {
        for tier in [LodTier::High, LodTier::Medium, LodTier::Low] {
            let stride = tier.stride();
            let offset = (cycle % stride as u64) as usize;
            out.extend(self.tier(tier).iter().skip(offset).step_by(stride).copied());
        }
    }
}
