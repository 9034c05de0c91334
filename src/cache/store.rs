//! Bounded per-instance tile store with least-recently-used eviction.
//!
//! The viewer pans one visibility window at a time and the tile size
//! already equals that window, so a handful of tiles covers rapid
//! left/right panning without unbounded growth.

use crate::cache::tile::AlignmentTile;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Fixed store capacity.
pub const MAX_TILE_COUNT: usize = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct TileStoreStats {
    pub entries: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
}

impl TileStoreStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// Mapping from tile index to finalized tile, bounded at `capacity`.
#[derive(Debug)]
pub struct TileStore {
    entries: HashMap<i32, Arc<AlignmentTile>>,
    access_order: VecDeque<i32>,
    capacity: usize,
    hit_count: u64,
    miss_count: u64,
    eviction_count: u64,
}

impl TileStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            access_order: VecDeque::with_capacity(capacity),
            capacity,
            hit_count: 0,
            miss_count: 0,
            eviction_count: 0,
        }
    }

    /// Fetch a tile, marking it most recently used.
    pub fn get(&mut self, tile_index: i32) -> Option<Arc<AlignmentTile>> {
        match self.entries.get(&tile_index) {
            Some(tile) => {
                let tile = Arc::clone(tile);
                self.touch(tile_index);
                self.hit_count += 1;
                Some(tile)
            }
            None => {
                self.miss_count += 1;
                None
            }
        }
    }

    /// Insert a tile, evicting the least recently used entry at capacity.
    pub fn put(&mut self, tile_index: i32, tile: Arc<AlignmentTile>) {
        if self.entries.contains_key(&tile_index) {
            self.entries.insert(tile_index, tile);
            self.touch(tile_index);
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some(victim) = self.access_order.pop_front() {
                self.entries.remove(&victim);
                self.eviction_count += 1;
            }
        }
        self.entries.insert(tile_index, tile);
        self.access_order.push_back(tile_index);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.access_order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> TileStoreStats {
        TileStoreStats {
            entries: self.entries.len(),
            hit_count: self.hit_count,
            miss_count: self.miss_count,
            eviction_count: self.eviction_count,
        }
    }

    fn touch(&mut self, tile_index: i32) {
        if let Some(pos) = self.access_order.iter().position(|&k| k == tile_index) {
            self.access_order.remove(pos);
            self.access_order.push_back(tile_index);
        }
    }
}

impl Default for TileStore {
    fn default() -> Self {
        Self::new(MAX_TILE_COUNT)
    }
}
