//! One tile of cached alignments and the streaming downsampler that
//! bounds it.
//!
//! A "bucket" is a 10-base window of start positions used to cap the
//! number of retained alignments in deep-coverage regions. Little or no
//! information is added by displaying more than ~50X coverage, so past
//! the per-bucket budget new arrivals replace random earlier candidates
//! with a probability that decays harmonically, tracking the classical
//! reservoir invariant. Coverage counts are taken before sampling and
//! stay exact.
//!
//! Construction is two-phase: a `TileBuilder` owns the sampler scratch
//! while the loader streams records into it; `into_tile` flushes the
//! final bucket and freezes everything into an immutable
//! `AlignmentTile` that the store shares out.

use crate::sam::{Alignment, AlignmentCounts, SpliceJunctionFeature, SpliceJunctionHelper};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tessella_core::CacheConfig;

/// Width of one sampling bucket, in bases.
const SAMPLING_WINDOW: i64 = 10;

/// A finalized tile: records, counts, and splice summaries for the
/// half-open interval `[start, end)` of one reference sequence.
#[derive(Debug)]
pub struct AlignmentTile {
    tile_index: i32,
    start: i64,
    end: i64,
    contained_records: Vec<Arc<Alignment>>,
    overlapping_records: Vec<Arc<Alignment>>,
    counts: Arc<AlignmentCounts>,
    splice_contained: Vec<SpliceJunctionFeature>,
    splice_overlapping: Vec<SpliceJunctionFeature>,
}

impl AlignmentTile {
    pub fn tile_index(&self) -> i32 {
        self.tile_index
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    /// Records whose start lies inside the tile interval, in arrival
    /// (post-sampling) order.
    pub fn contained_records(&self) -> &[Arc<Alignment>] {
        &self.contained_records
    }

    /// Records starting before the tile whose end extends into it.
    pub fn overlapping_records(&self) -> &[Arc<Alignment>] {
        &self.overlapping_records
    }

    pub fn counts(&self) -> &Arc<AlignmentCounts> {
        &self.counts
    }

    pub fn splice_contained(&self) -> &[SpliceJunctionFeature] {
        &self.splice_contained
    }

    pub fn splice_overlapping(&self) -> &[SpliceJunctionFeature] {
        &self.splice_overlapping
    }
}

/// A tile under construction, exclusively owned by the loader.
pub struct TileBuilder {
    tile_index: i32,
    start: i64,
    end: i64,
    max_depth: usize,
    /// Remaining admission budget in the current bucket.
    sampling_depth: i64,
    sampling_prob: f64,
    /// End position of the current sampling bucket.
    window_end: i64,
    contained_records: Vec<Arc<Alignment>>,
    overlapping_records: Vec<Arc<Alignment>>,
    counts: AlignmentCounts,
    splice_helper: Option<SpliceJunctionHelper>,
    /// Candidate records in the active bucket.
    current_window: Vec<Arc<Alignment>>,
    /// Read name -> indices into `current_window`, first two admissions only.
    current_mates: HashMap<String, Vec<usize>>,
    /// Names whose mate was retained in a prior bucket; the partner is
    /// force-admitted when it arrives.
    paired_read_names: HashSet<String>,
    rng: SmallRng,
}

impl TileBuilder {
    pub fn new(
        tile_index: i32,
        start: i64,
        end: i64,
        max_depth: usize,
        config: &CacheConfig,
        rng_seed: u64,
    ) -> Self {
        let max_depth = max_depth.max(1);
        let splice_helper = config.show_junction_track.then(SpliceJunctionHelper::new);
        Self {
            tile_index,
            start,
            end,
            max_depth,
            sampling_depth: max_depth as i64,
            sampling_prob: 1.0,
            window_end: -1,
            contained_records: Vec::new(),
            overlapping_records: Vec::new(),
            counts: AlignmentCounts::for_range(start, end, config.bisulfite_context),
            splice_helper,
            current_window: Vec::with_capacity(max_depth),
            current_mates: HashMap::with_capacity(max_depth),
            paired_read_names: HashSet::with_capacity(max_depth),
            rng: SmallRng::seed_from_u64(rng_seed),
        }
    }

    pub fn tile_index(&self) -> i32 {
        self.tile_index
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    /// Feed one filter-passing record through the sampler. The record is
    /// not necessarily retained; counts and splice data always are.
    pub fn add_record(&mut self, alignment: Arc<Alignment>) {
        let beta = 1.0 / self.max_depth as f64;

        if alignment.start >= self.window_end {
            self.empty_bucket();
            self.sampling_prob = 1.0;
            self.sampling_depth = self.max_depth as i64;
            self.window_end = alignment.start + SAMPLING_WINDOW;
        }

        self.counts.inc(&alignment);
        if let Some(helper) = self.splice_helper.as_mut() {
            helper.add(&alignment);
        }

        let read_name = alignment.read_name.as_str();

        // A mate that should already have been seen (mate start precedes
        // this record) but was sampled away gets lower priority.
        let dont_have_expected_pair = alignment.paired
            && alignment
                .mate
                .map_or(false, |m| m.mapped && m.start < alignment.start)
            && !self.paired_read_names.contains(read_name)
            && !self.current_mates.contains_key(read_name);

        let mut added = false;
        if self.paired_read_names.contains(read_name) {
            // The mate was kept in a prior bucket; keep the pair intact.
            self.allocate(Arc::clone(&alignment));
            self.paired_read_names.remove(read_name);
            self.sampling_depth -= 1;
            added = true;
        }

        if self.sampling_depth < 1 {
            return; // no room for further alignments in this bucket
        }

        if self.current_window.len() as i64 > self.sampling_depth
            && !self.current_mates.contains_key(read_name)
        {
            if !added && !dont_have_expected_pair && self.rng.gen::<f64>() < self.sampling_prob {
                let idx = self.rng.gen_range(0..self.current_window.len() - 1);
                let replaced =
                    std::mem::replace(&mut self.current_window[idx], Arc::clone(&alignment));
                self.drop_replaced_mate(&replaced, idx);
            }
        } else if !added && !dont_have_expected_pair {
            self.current_window.push(Arc::clone(&alignment));
            let indices = self.current_mates.entry(read_name.to_string()).or_default();
            if indices.len() < 2 {
                indices.push(self.current_window.len() - 1);
            }
        }

        self.sampling_prob = 1.0 / (beta + 1.0 / self.sampling_prob);
    }

    /// When a sampled-out record leaves the window, its retained mate (if
    /// any) leaves too, so the window never carries half of a pair it
    /// chose to drop.
    fn drop_replaced_mate(&mut self, replaced: &Alignment, kept_idx: usize) {
        let others: Vec<usize> = match self.current_mates.get(&replaced.read_name) {
            Some(indices) => indices.iter().copied().filter(|&i| i != kept_idx).collect(),
            None => return,
        };
        if others.is_empty() {
            return;
        }
        // Indices may be stale after earlier removals; the bounds check
        // keeps removal safe. Remove back to front so the remaining
        // indices stay meaningful.
        let mut others = others;
        others.sort_unstable_by(|a, b| b.cmp(a));
        for idx in others {
            if idx < self.current_window.len() {
                self.current_window.remove(idx);
            }
        }
        self.current_mates.remove(&replaced.read_name);
    }

    /// Flush the active bucket: every surviving candidate is allocated to
    /// the tile, and names with a mapped mate are remembered so the
    /// partner is force-admitted later.
    fn empty_bucket(&mut self) {
        let window = std::mem::take(&mut self.current_window);
        for alignment in window {
            self.allocate(Arc::clone(&alignment));
            let read_name = alignment.read_name.as_str();
            if self.paired_read_names.contains(read_name) {
                self.paired_read_names.remove(read_name);
            } else if alignment.paired && alignment.mate_mapped() {
                self.paired_read_names.insert(read_name.to_string());
            }
        }
        self.current_mates.clear();
    }

    /// Route an admitted record to the contained or overlapping list.
    fn allocate(&mut self, alignment: Arc<Alignment>) {
        if alignment.start >= self.start && alignment.start < self.end {
            self.contained_records.push(alignment);
        } else if alignment.end > self.start && alignment.start < self.start {
            self.overlapping_records.push(alignment);
        }
    }

    /// Flush the final bucket, partition splice features, and freeze.
    pub fn into_tile(mut self) -> AlignmentTile {
        self.empty_bucket();

        let mut splice_contained = Vec::new();
        let mut splice_overlapping = Vec::new();
        if let Some(mut helper) = self.splice_helper.take() {
            helper.finish();
            for feature in helper.into_features() {
                if feature.start >= self.start {
                    splice_contained.push(feature);
                } else {
                    splice_overlapping.push(feature);
                }
            }
        }

        AlignmentTile {
            tile_index: self.tile_index,
            start: self.start,
            end: self.end,
            contained_records: self.contained_records,
            overlapping_records: self.overlapping_records,
            counts: Arc::new(self.counts),
            splice_contained,
            splice_overlapping,
        }
    }
}
