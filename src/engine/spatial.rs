// Uniform spatial hash grid for neighbour lookup on the XZ plane.
//
// Cell (cx, cz) = (floor(x / cell_size), floor(z / cell_size)). The grid is
// unbounded: only occupied cells exist, so sparse crowds in a large world
// cost nothing for the empty space between them.

use std::collections::HashMap;

use bevy_ecs::entity::Entity;
use glam::{IVec2, Vec3};
use log::debug;

use super::pool::ScratchPool;

/// Offsets of the 3×3 block searched by every query.
const NEIGHBOR_BLOCK: [(i32, i32); 9] = [
    (-1, -1), (0, -1), (1, -1),
    (-1,  0), (0,  0), (1,  0),
    (-1,  1), (0,  1), (1,  1),
];

pub struct SpatialGrid {
    cells: HashMap<IVec2, Vec<Entity>>,
    /// Cell each stored agent landed in at the last rebuild.
    locations: HashMap<Entity, IVec2>,
    cell_size: f32,
    max_agents_per_cell: usize,
    pool: ScratchPool<Entity>,
    dropped: usize,
}

impl SpatialGrid {
    /// `cell_size` is the side length of each cell in world units.
    pub fn new(cell_size: f32, max_agents_per_cell: usize) -> Self {
        Self {
            cells: HashMap::new(),
            locations: HashMap::new(),
            cell_size: cell_size.max(f32::EPSILON),
            max_agents_per_cell: max_agents_per_cell.max(1),
            pool: ScratchPool::default(),
            dropped: 0,
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Cell containing world position `pos` (Y ignored).
    pub fn cell_of(&self, pos: Vec3) -> IVec2 {
        IVec2::new(
            (pos.x / self.cell_size).floor() as i32,
            (pos.z / self.cell_size).floor() as i32,
        )
    }

    /// Release every occupied cell. Untouched space is never visited.
    pub fn clear(&mut self) {
        for (_, buf) in self.cells.drain() {
            self.pool.release(buf);
        }
        self.locations.clear();
        self.dropped = 0;
    }

    /// Insert `entity` at `pos`. Returns false if the cell is full; the
    /// agent is then simply absent from the grid until the next rebuild.
    pub fn insert(&mut self, entity: Entity, pos: Vec3) -> bool {
        let cell = self.cell_of(pos);
        let pool = &mut self.pool;
        let bucket = self.cells.entry(cell).or_insert_with(|| pool.acquire());
        if bucket.len() >= self.max_agents_per_cell {
            self.dropped += 1;
            return false;
        }
        bucket.push(entity);
        self.locations.insert(entity, cell);
        true
    }

    /// Clear and repopulate from current agent positions.
    pub fn rebuild<I>(&mut self, agents: I)
    where
        I: IntoIterator<Item = (Entity, Vec3)>,
    {
        self.clear();
        for (entity, pos) in agents {
            self.insert(entity, pos);
        }
        if self.dropped > 0 {
            debug!(
                "spatial grid: {} agents dropped from full cells (cap {})",
                self.dropped, self.max_agents_per_cell
            );
        }
    }

    /// Remove `entity` from whichever cell holds it.
    pub fn remove(&mut self, entity: Entity) -> bool {
        let Some(cell) = self.locations.remove(&entity) else {
            return false;
        };
        if let Some(bucket) = self.cells.get_mut(&cell) {
            bucket.retain(|&e| e != entity);
            if bucket.is_empty() {
                if let Some(buf) = self.cells.remove(&cell) {
                    self.pool.release(buf);
                }
            }
        }
        true
    }

    /// Append to `out` every agent in the 3×3 block of cells around `pos`.
    ///
    /// Returns a superset of nearby agents; callers must distance-filter.
    /// `_radius` does not widen the search: the cell size is expected to cover
    /// the avoidance radius. Does not clear `out` before writing.
    pub fn query(&self, pos: Vec3, _radius: f32, out: &mut Vec<Entity>) {
        let center = self.cell_of(pos);
        for (dx, dz) in NEIGHBOR_BLOCK {
            if let Some(bucket) = self.cells.get(&(center + IVec2::new(dx, dz))) {
                out.extend_from_slice(bucket);
            }
        }
    }

    /// Like `query`, but never yields `exclude` itself.
    pub fn query_excluding(&self, exclude: Entity, pos: Vec3, radius: f32, out: &mut Vec<Entity>) {
        let start = out.len();
        self.query(pos, radius, out);
        let mut i = start;
        while i < out.len() {
            if out[i] == exclude {
                out.swap_remove(i);
            } else {
                i += 1;
            }
        }
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.locations.contains_key(&entity)
    }

    /// Number of agents currently stored.
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }

    /// Agents rejected by full cells during the last rebuild.
    pub fn dropped_last_rebuild(&self) -> usize {
        self.dropped
    }
}
