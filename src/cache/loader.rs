//! Streaming half of a tile load: drains one range query from the
//! reader, reconstructs unmapped-mate sequences, filters, fans records
//! out to the tiles they overlap, and honors the cancellation and
//! memory-pressure protocol.

use crate::cache::tile::TileBuilder;
use crate::cache::CacheShared;
use crate::coordinator::Coordinator;
use crate::sam::{Alignment, AlignmentIterator, PeStats};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tessella_core::{CacheConfig, TessellaResult};
use tracing::debug;

/// Bound on each of the in-flight mate maps.
pub(crate) const MATE_CACHE_CAPACITY: usize = 1_000;

const PROGRESS_INTERVAL: usize = 1_000;
const TEST_PROGRESS_INTERVAL: usize = 100_000;

/// Records between status updates and memory probes. Unit-test builds
/// use a long interval so real memory checks stay out of the way.
pub(crate) fn progress_interval() -> usize {
    if cfg!(test) {
        TEST_PROGRESS_INTERVAL
    } else {
        PROGRESS_INTERVAL
    }
}

/// Bounded read-name -> record map for in-flight mate pairing. Eviction
/// is insertion-ordered, which the mate protocol tolerates: an evicted
/// entry only costs a missed mate-sequence fill.
pub(crate) struct MateCache {
    entries: HashMap<String, Arc<Alignment>>,
    order: VecDeque<String>,
    capacity: usize,
}

impl MateCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn get(&self, read_name: &str) -> Option<&Arc<Alignment>> {
        self.entries.get(read_name)
    }

    pub(crate) fn put(&mut self, read_name: &str, record: Arc<Alignment>) {
        if self.entries.insert(read_name.to_string(), record).is_none() {
            self.order.push_back(read_name.to_string());
            while self.entries.len() > self.capacity {
                if let Some(victim) = self.order.pop_front() {
                    self.entries.remove(&victim);
                }
            }
        }
    }

    pub(crate) fn remove(&mut self, read_name: &str) {
        if self.entries.remove(read_name).is_some() {
            if let Some(pos) = self.order.iter().position(|n| n == read_name) {
                self.order.remove(pos);
            }
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &Arc<Alignment>)> {
        self.entries.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Drain the reader's range query into the tile builders.
///
/// Returns `Ok(true)` when the stream completed, `Ok(false)` on
/// cooperative cancellation (explicit cancel or unrecovered memory
/// pressure). Reader faults propagate as `Err`; the caller owns closing
/// the iterator and classifying the fault.
#[allow(clippy::too_many_arguments)]
pub(crate) fn consume_stream(
    iter: &mut dyn AlignmentIterator,
    builders: &mut [TileBuilder],
    pe_stats: &mut HashMap<String, PeStats>,
    config: &CacheConfig,
    shared: &CacheShared,
    coordinator: &Coordinator,
    tile_size: i64,
    range_start: i64,
    paired_end: &mut bool,
) -> TessellaResult<bool> {
    let mut mapped_mates = MateCache::new(MATE_CACHE_CAPACITY);
    let mut unmapped_mates = MateCache::new(MATE_CACHE_CAPACITY);
    let last_tile = builders.len() - 1;
    let interval = progress_interval();
    let mut record_count = 0usize;

    for item in iter {
        if shared.is_cancelled() {
            return Ok(false);
        }

        let record = Arc::new(item?);
        let read_name = record.read_name.as_str();

        // Reconstruct mate sequences for half-mapped pairs while both
        // halves are within the bounded in-flight maps.
        if record.paired {
            *paired_end = true;
            if record.mapped {
                if !record.mate_mapped() {
                    if let Some(mate) = unmapped_mates.get(read_name).cloned() {
                        record.set_mate_sequence(mate.read_sequence.clone());
                        unmapped_mates.remove(read_name);
                        mapped_mates.remove(read_name);
                    } else {
                        mapped_mates.put(read_name, Arc::clone(&record));
                    }
                }
            } else if record.mate_mapped() {
                if let Some(mapped) = mapped_mates.get(read_name).cloned() {
                    mapped.set_mate_sequence(record.read_sequence.clone());
                    unmapped_mates.remove(read_name);
                    mapped_mates.remove(read_name);
                } else {
                    unmapped_mates.put(read_name, Arc::clone(&record));
                }
            }
        }

        if !record.mapped
            || (!config.show_duplicates && record.duplicate)
            || (config.filter_failed_reads && record.vendor_failed)
            || record.mapping_quality < config.quality_threshold
            || config
                .read_group_filter
                .as_ref()
                .map_or(false, |f| f.excludes(record.read_group.as_deref()))
        {
            continue;
        }

        // Fan out to every tile this record overlaps.
        let idx0 = ((record.start - range_start) / tile_size).max(0) as usize;
        let idx1 = (((record.end - range_start) / tile_size).min(last_tile as i64)) as usize;
        if idx0 <= idx1 {
            for builder in &mut builders[idx0..=idx1] {
                builder.add_record(Arc::clone(&record));
            }
        }

        record_count += 1;
        if record_count % interval == 0 {
            if shared.is_cancelled() {
                return Ok(false);
            }
            debug!("reads loaded: {}", record_count);
            if !coordinator.check_memory() {
                coordinator.cancel_readers();
                return Ok(false);
            }
        }

        if record.paired && record.proper_pair {
            let library = record.library.as_deref().unwrap_or("null");
            pe_stats
                .entry(library.to_string())
                .or_insert_with_key(|key| PeStats::new(key.clone()))
                .update(&record);
        }
    }

    for stats in pe_stats.values_mut() {
        stats.compute(
            config.min_insert_size_percentile,
            config.max_insert_size_percentile,
        );
    }

    // Fill in any mate sequences still pending after the stream ended.
    for (read_name, mapped) in mapped_mates.iter() {
        if let Some(mate) = unmapped_mates.get(read_name) {
            mapped.set_mate_sequence(mate.read_sequence.clone());
        }
    }

    debug!("load complete: {} records", record_count);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> Arc<Alignment> {
        Arc::new(Alignment::new(name, 0, 100))
    }

    #[test]
    fn mate_cache_evicts_in_insertion_order() {
        let mut cache = MateCache::new(3);
        for name in ["a", "b", "c", "d"] {
            cache.put(name, record(name));
        }
        assert_eq!(cache.len(), 3);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("d").is_some());
    }

    #[test]
    fn mate_cache_put_same_name_does_not_grow() {
        let mut cache = MateCache::new(2);
        cache.put("a", record("a"));
        cache.put("a", record("a"));
        cache.put("b", record("b"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
    }

    #[test]
    fn mate_cache_remove_frees_a_slot() {
        let mut cache = MateCache::new(2);
        cache.put("a", record("a"));
        cache.put("b", record("b"));
        cache.remove("a");
        cache.put("c", record("c"));
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
        assert!(cache.get("a").is_none());
    }
}
