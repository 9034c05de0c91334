//! Tiled, depth-limited cache over a random-access alignment reader.
//!
//! `CachingReader` wraps an indexed source and serves interval queries
//! from fixed-size tiles: hits come straight from the store, contiguous
//! runs of misses load through a single range query, and deep-coverage
//! regions are downsampled per tile while coverage counts stay exact.

pub mod iter;
pub mod loader;
pub mod store;
pub mod tile;

pub use iter::TiledIterator;
pub use store::{TileStore, TileStoreStats, MAX_TILE_COUNT};
pub use tile::{AlignmentTile, TileBuilder};

use crate::coordinator::Coordinator;
use crate::sam::{
    AlignmentCounts, AlignmentHeader, AlignmentIterator, AlignmentReader, PeStats,
    SpliceJunctionFeature,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tessella_core::{CacheConfig, TessellaError, TessellaResult};
use tracing::{debug, error, warn};

const KB: i64 = 1_000;
/// Mitochondrial sequences are tiny and deeply covered; they always use
/// a fixed 1 kb tile regardless of the visibility window.
const MITOCHONDRIA_TILE_SIZE: i64 = 1_000;

/// Tile size bookkeeping for one cache instance.
#[derive(Debug)]
struct TileGeometry {
    visibility_window_kb: f32,
    tile_size: i64,
}

/// State reachable from the process-wide registry: the cooperative
/// cancel flag, the tile store, and the tile geometry. The owning
/// `CachingReader` holds the only strong handle apart from transient
/// per-load registrations.
pub(crate) struct CacheShared {
    cancel: AtomicBool,
    pub(crate) store: Mutex<TileStore>,
    geometry: Mutex<TileGeometry>,
}

impl CacheShared {
    pub(crate) fn new(visibility_window_kb: f32) -> Self {
        Self {
            cancel: AtomicBool::new(false),
            store: Mutex::new(TileStore::default()),
            geometry: Mutex::new(TileGeometry {
                visibility_window_kb,
                tile_size: (visibility_window_kb * KB as f32) as i64,
            }),
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub(crate) fn set_cancelled(&self, cancelled: bool) {
        self.cancel.store(cancelled, Ordering::Release);
    }

    pub(crate) fn clear_store(&self) {
        self.store.lock().clear();
    }

    pub(crate) fn tile_size(&self) -> i64 {
        self.geometry.lock().tile_size
    }

    /// Apply a new visibility window. The tile size only moves when the
    /// window changes by more than a factor of two; crossing that
    /// threshold discards every cached tile.
    pub(crate) fn update_geometry(&self, new_kb: f32) {
        let mut geometry = self.geometry.lock();
        let ratio = new_kb / geometry.visibility_window_kb;
        if !(0.5..=2.0).contains(&ratio) {
            geometry.tile_size = (new_kb * KB as f32) as i64;
            geometry.visibility_window_kb = new_kb;
            drop(geometry);
            self.store.lock().clear();
        }
    }
}

/// Result of one tile-loading pass. `Loaded` carries the published
/// tiles so a batch longer than the store capacity is still returned
/// whole; `Cancelled` is the non-error sentinel for cooperative aborts.
pub(crate) enum LoadOutcome {
    Loaded(Vec<Arc<AlignmentTile>>),
    Cancelled,
}

/// Caching wrapper for an alignment reader.
pub struct CachingReader<R: AlignmentReader> {
    reader: R,
    shared: Arc<CacheShared>,
    coordinator: Arc<Coordinator>,
    cached_sequence: String,
    paired_end: bool,
    seed_state: u64,
}

impl<R: AlignmentReader> CachingReader<R> {
    /// Wrap `reader` and register with the coordinator for memory and
    /// visibility broadcasts. Fails when the source has no index; the
    /// cache cannot serve interval queries without one.
    pub fn new(
        reader: R,
        coordinator: Arc<Coordinator>,
        config: &CacheConfig,
    ) -> TessellaResult<Self> {
        config.validate()?;
        if !reader.has_index() {
            return Err(TessellaError::MissingIndex(
                "interval queries require an indexed alignment source".into(),
            ));
        }
        let shared = Arc::new(CacheShared::new(config.max_visible_range_kb));
        coordinator.register(Arc::downgrade(&shared));
        let seed_state = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9e37_79b9_7f4a_7c15);
        Ok(Self {
            reader,
            shared,
            coordinator,
            cached_sequence: String::new(),
            paired_end: false,
            seed_state,
        })
    }

    /// Fix the sampling seed, making tile downsampling reproducible.
    pub fn with_sampling_seed(mut self, seed: u64) -> Self {
        self.seed_state = seed;
        self
    }

    pub fn wrapped_reader(&self) -> &R {
        &self.reader
    }

    pub fn sequence_names(&self) -> Vec<String> {
        self.reader.sequence_names()
    }

    pub fn header(&self) -> &AlignmentHeader {
        self.reader.header()
    }

    pub fn has_index(&self) -> bool {
        self.reader.has_index()
    }

    /// Whole-file scan, bypassing the cache.
    pub fn iter_all(&mut self) -> TessellaResult<Box<dyn AlignmentIterator + '_>> {
        self.reader.iter_all()
    }

    pub fn close(&mut self) -> TessellaResult<()> {
        self.reader.close()
    }

    /// Whether any load so far has seen paired-end data.
    pub fn is_paired_end(&self) -> bool {
        self.paired_end
    }

    pub fn clear_cache(&self) {
        self.shared.clear_store();
    }

    pub fn cached_tile_count(&self) -> usize {
        self.shared.store.lock().len()
    }

    pub fn store_stats(&self) -> TileStoreStats {
        self.shared.store.lock().stats()
    }

    /// Re-apply the visibility window from a fresh configuration
    /// snapshot (subject to the factor-of-two hysteresis).
    pub fn update_cache(&self, config: &CacheConfig) {
        self.shared.update_geometry(config.max_visible_range_kb);
    }

    pub fn tile_size_for(&self, sequence: &str) -> i64 {
        if matches!(sequence, "M" | "chrM" | "MT" | "chrMT") {
            MITOCHONDRIA_TILE_SIZE
        } else {
            self.shared.tile_size()
        }
    }

    /// Serve `[start, end)` on `sequence` from the tile cache, loading
    /// missing tiles in contiguous batches. Per-tile counts are appended
    /// to `counts`, splice summaries to `splice_features` when provided,
    /// and per-library insert-size stats accumulate into `pe_stats`.
    ///
    /// On cooperative cancellation the iterator covers whatever tiles
    /// were assembled before the abort.
    #[allow(clippy::too_many_arguments)]
    pub fn query(
        &mut self,
        sequence: &str,
        start: i64,
        end: i64,
        counts: &mut Vec<Arc<AlignmentCounts>>,
        mut splice_features: Option<&mut Vec<SpliceJunctionFeature>>,
        max_read_depth: usize,
        pe_stats: &mut HashMap<String, PeStats>,
        config: &CacheConfig,
    ) -> TessellaResult<TiledIterator> {
        if start >= end {
            return Ok(TiledIterator::empty());
        }

        let tile_size = self.tile_size_for(sequence);
        // A read exactly on a tile boundary belongs to the next tile,
        // matching the loader's partitioning.
        let start_tile = ((start + 1) / tile_size) as i32;
        let end_tile = (end / tile_size) as i32; // inclusive

        // Be a bit conservative with the requested depth.
        let depth_plus = (1.1 * max_read_depth as f64).ceil() as usize;

        if sequence != self.cached_sequence {
            self.shared.clear_store();
            self.cached_sequence = sequence.to_string();
        }

        let mut tiles: Vec<Arc<AlignmentTile>> =
            Vec::with_capacity((end_tile - start_tile + 1).max(0) as usize);
        let mut pending: Vec<TileBuilder> = Vec::new();

        for tile_index in start_tile..=end_tile {
            let hit = self.shared.store.lock().get(tile_index);
            match hit {
                Some(tile) => {
                    // Flush any preceding misses before taking the hit so
                    // tile order is preserved.
                    if !pending.is_empty() {
                        let batch = std::mem::take(&mut pending);
                        match self.load_tiles(sequence, batch, pe_stats, config)? {
                            LoadOutcome::Loaded(loaded) => tiles.extend(loaded),
                            LoadOutcome::Cancelled => {
                                return Ok(assemble(
                                    &tiles,
                                    start,
                                    end,
                                    counts,
                                    splice_features.take(),
                                ));
                            }
                        }
                    }
                    tiles.push(tile);
                }
                None => {
                    let tile_start = tile_index as i64 * tile_size;
                    pending.push(TileBuilder::new(
                        tile_index,
                        tile_start,
                        tile_start + tile_size,
                        depth_plus,
                        config,
                        self.next_tile_seed(),
                    ));
                }
            }
        }

        if !pending.is_empty() {
            match self.load_tiles(sequence, pending, pe_stats, config)? {
                LoadOutcome::Loaded(loaded) => tiles.extend(loaded),
                LoadOutcome::Cancelled => {}
            }
        }

        Ok(assemble(&tiles, start, end, counts, splice_features.take()))
    }

    /// Load a contiguous run of missing tiles with one range query.
    fn load_tiles(
        &mut self,
        sequence: &str,
        mut builders: Vec<TileBuilder>,
        pe_stats: &mut HashMap<String, PeStats>,
        config: &CacheConfig,
    ) -> TessellaResult<LoadOutcome> {
        if self.coordinator.corrupt_index() {
            return Ok(LoadOutcome::Cancelled);
        }
        let range_end = match builders.last() {
            Some(last) => last.end(),
            None => return Ok(LoadOutcome::Loaded(Vec::new())),
        };
        let range_start = builders[0].start();
        debug!(
            "loading tiles {}..={} on {}",
            builders[0].tile_index(),
            builders[builders.len() - 1].tile_index(),
            sequence
        );

        let tile_size = self.tile_size_for(sequence);
        let load_ref = Arc::downgrade(&self.shared);
        self.coordinator.register(load_ref.clone());

        let shared = Arc::clone(&self.shared);
        let coordinator = Arc::clone(&self.coordinator);
        let mut paired_end = self.paired_end;

        let outcome = match self.reader.query(sequence, range_start + 1, range_end, false) {
            Ok(mut iter) => {
                let result = loader::consume_stream(
                    iter.as_mut(),
                    &mut builders,
                    pe_stats,
                    config,
                    &shared,
                    &coordinator,
                    tile_size,
                    range_start,
                    &mut paired_end,
                );
                iter.close();
                result
            }
            Err(e) => Err(e),
        };

        // The read is over however we got here; reset the flag for the
        // next query and drop this load's registry entry.
        self.shared.set_cancelled(false);
        self.coordinator.deregister(&load_ref);
        self.paired_end = paired_end;

        match outcome {
            Ok(true) => {
                let mut published = Vec::with_capacity(builders.len());
                let mut store = self.shared.store.lock();
                for builder in builders {
                    let tile = Arc::new(builder.into_tile());
                    store.put(tile.tile_index(), Arc::clone(&tile));
                    published.push(tile);
                }
                Ok(LoadOutcome::Loaded(published))
            }
            Ok(false) => Ok(LoadOutcome::Cancelled),
            Err(e) => classify_fault(e, &self.coordinator),
        }
    }

    fn next_tile_seed(&mut self) -> u64 {
        self.seed_state = self
            .seed_state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.seed_state
    }
}

/// Concatenate tile records (first tile's overlapping, then contained
/// per tile), collect counts and splice features, sort, and wrap in the
/// interval-filtered iterator.
fn assemble(
    tiles: &[Arc<AlignmentTile>],
    query_start: i64,
    query_end: i64,
    counts: &mut Vec<Arc<AlignmentCounts>>,
    mut splice_features: Option<&mut Vec<SpliceJunctionFeature>>,
) -> TiledIterator {
    if tiles.is_empty() {
        return TiledIterator::empty();
    }

    let record_count = tiles[0].overlapping_records().len()
        + tiles
            .iter()
            .map(|t| t.contained_records().len())
            .sum::<usize>();
    let mut alignments = Vec::with_capacity(record_count);
    alignments.extend(tiles[0].overlapping_records().iter().cloned());
    if let Some(features) = splice_features.as_mut() {
        features.extend(tiles[0].splice_overlapping().iter().cloned());
    }

    for tile in tiles {
        alignments.extend(tile.contained_records().iter().cloned());
        counts.push(Arc::clone(tile.counts()));
        if let Some(features) = splice_features.as_mut() {
            features.extend(tile.splice_contained().iter().cloned());
        }
    }

    // Added in two passes and downsampled, so restore start order.
    // The sort is stable, preserving stream order on ties.
    alignments.sort_by_key(|a| a.start);
    TiledIterator::new(alignments, query_start, query_end)
}

/// Classify a reader fault: a corrupt index latches process-wide and
/// downgrades to a cancelled load; anything else is fatal.
fn classify_fault(error: TessellaError, coordinator: &Coordinator) -> TessellaResult<LoadOutcome> {
    match error {
        TessellaError::CorruptIndex(msg) => {
            coordinator.set_corrupt_index();
            warn!(
                "error querying alignments ({}); this is often caused by a corrupt index file",
                msg
            );
            Ok(LoadOutcome::Cancelled)
        }
        other => {
            error!("error loading alignment data: {}", other);
            Err(TessellaError::DataLoad(other.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_holds_within_hysteresis_band() {
        let shared = CacheShared::new(16.0);
        assert_eq!(shared.tile_size(), 16_000);
        shared.update_geometry(20.0); // ratio 1.25, inside the band
        assert_eq!(shared.tile_size(), 16_000);
        shared.update_geometry(8.0); // ratio 0.5, still inside
        assert_eq!(shared.tile_size(), 16_000);
    }

    #[test]
    fn geometry_rebuilds_past_factor_of_two() {
        let shared = CacheShared::new(16.0);
        shared.update_geometry(40.0); // ratio 2.5
        assert_eq!(shared.tile_size(), 40_000);
        shared.update_geometry(10.0); // ratio 0.25 of the new window
        assert_eq!(shared.tile_size(), 10_000);
    }

    #[test]
    fn fractional_windows_round_to_bases() {
        let shared = CacheShared::new(1.5);
        assert_eq!(shared.tile_size(), 1_500);
    }
}
