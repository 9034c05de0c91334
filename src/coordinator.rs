//! Process-wide coordination for cache instances.
//!
//! One `Coordinator` is constructed at startup and injected into every
//! `CachingReader`. It tracks live instances through weak references (so
//! the registry never extends an instance's life), latches the
//! corrupt-index flag, and serializes the memory-pressure check that can
//! broadcast-cancel every in-flight load.

use crate::cache::CacheShared;
use anyhow::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use tracing::{debug, warn};

/// Loads abort when the probe reports less than this fraction of the
/// managed pool free, twice in a row.
const MIN_FREE_FRACTION: f64 = 0.2;

/// Injectable view of host memory pressure.
pub trait MemoryProbe: Send + Sync {
    /// Fraction of the managed pool currently available, in `[0, 1]`.
    fn available_fraction(&self) -> f64;

    /// Best-effort hint to release reclaimable memory.
    fn reclaim_hint(&self) {}
}

/// Probe backed by `/proc/meminfo` on Linux. Elsewhere (and on parse
/// failure) it reports no pressure rather than cancelling loads on bad
/// data.
#[derive(Debug, Default)]
pub struct SystemMemoryProbe;

impl MemoryProbe for SystemMemoryProbe {
    fn available_fraction(&self) -> f64 {
        system_available_fraction().unwrap_or(1.0)
    }
}

#[cfg(target_os = "linux")]
fn system_available_fraction() -> Result<f64> {
    use std::io::{BufRead, BufReader};

    let file = std::fs::File::open("/proc/meminfo")?;
    let reader = BufReader::new(file);

    let mut total = 0u64;
    let mut available = 0u64;
    for line in reader.lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("MemTotal:") => {
                total = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            }
            Some("MemAvailable:") => {
                available = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            }
            _ => {}
        }
        if total > 0 && available > 0 {
            break;
        }
    }
    if total == 0 {
        anyhow::bail!("MemTotal missing from /proc/meminfo");
    }
    Ok(available as f64 / total as f64)
}

#[cfg(not(target_os = "linux"))]
fn system_available_fraction() -> Result<f64> {
    Ok(1.0)
}

/// Registry of live cache instances plus the process-wide flags.
pub struct Coordinator {
    readers: Mutex<Vec<Weak<CacheShared>>>,
    corrupt_index: AtomicBool,
    memory_lock: Mutex<()>,
    probe: Box<dyn MemoryProbe>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::with_probe(Box::new(SystemMemoryProbe))
    }

    pub fn with_probe(probe: Box<dyn MemoryProbe>) -> Self {
        Self {
            readers: Mutex::new(Vec::new()),
            corrupt_index: AtomicBool::new(false),
            memory_lock: Mutex::new(()),
            probe,
        }
    }

    pub(crate) fn register(&self, shared: Weak<CacheShared>) {
        self.readers.lock().push(shared);
    }

    /// Remove one registry entry for this instance (a load's transient
    /// registration in the completion epilogue).
    pub(crate) fn deregister(&self, target: &Weak<CacheShared>) {
        let mut readers = self.readers.lock();
        if let Some(pos) = readers.iter().position(|w| w.ptr_eq(target)) {
            readers.swap_remove(pos);
        }
    }

    /// Live instances currently registered, pruning dead entries.
    pub fn registered_count(&self) -> usize {
        let mut readers = self.readers.lock();
        readers.retain(|w| w.strong_count() > 0);
        readers.len()
    }

    /// Broadcast-cancel every registered instance and clear the
    /// registry. Each loader observes its flag at the next record.
    pub fn cancel_readers(&self) {
        let mut readers = self.readers.lock();
        for weak in readers.iter() {
            if let Some(shared) = weak.upgrade() {
                shared.set_cancelled(true);
            }
        }
        readers.clear();
        debug!("readers cancelled");
    }

    /// Drop every cached tile in every live instance.
    pub fn clear_all_caches(&self) {
        let snapshot: Vec<Weak<CacheShared>> = self.readers.lock().clone();
        for weak in snapshot {
            if let Some(shared) = weak.upgrade() {
                shared.clear_store();
            }
        }
    }

    /// Push a new visibility window to every live instance; each applies
    /// its own factor-of-two hysteresis.
    pub fn visibility_window_changed(&self, new_kb: f32) {
        let snapshot: Vec<Weak<CacheShared>> = self.readers.lock().clone();
        for weak in snapshot {
            if let Some(shared) = weak.upgrade() {
                shared.update_geometry(new_kb);
            }
        }
    }

    /// Sticky corrupt-index flag. Without it a load over a corrupt index
    /// would retry forever; once set, loads short-circuit to cancelled
    /// until the process restarts.
    pub fn corrupt_index(&self) -> bool {
        self.corrupt_index.load(Ordering::Acquire)
    }

    pub(crate) fn set_corrupt_index(&self) {
        self.corrupt_index.store(true, Ordering::Release);
    }

    /// Probe memory, attempting recovery once (global cache clear plus a
    /// reclaim hint). Returns false when pressure persists and loading
    /// should stop. Only one check runs at a time.
    pub(crate) fn check_memory(&self) -> bool {
        let _guard = self.memory_lock.lock();
        if self.probe.available_fraction() < MIN_FREE_FRACTION {
            warn!("available memory is low; clearing alignment caches");
            self.clear_all_caches();
            self.probe.reclaim_hint();
            if self.probe.available_fraction() < MIN_FREE_FRACTION {
                warn!("memory is low, read terminating");
                return false;
            }
        }
        true
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    struct ScriptedProbe {
        fractions: PlMutex<VecDeque<f64>>,
    }

    impl ScriptedProbe {
        fn new(fractions: impl IntoIterator<Item = f64>) -> Self {
            Self {
                fractions: PlMutex::new(fractions.into_iter().collect()),
            }
        }
    }

    impl MemoryProbe for ScriptedProbe {
        fn available_fraction(&self) -> f64 {
            self.fractions.lock().pop_front().unwrap_or(1.0)
        }
    }

    fn shared() -> Arc<CacheShared> {
        // Geometry value is irrelevant for these tests.
        Arc::new(CacheShared::new(16.0))
    }

    #[test]
    fn corrupt_index_latch_is_sticky() {
        let coordinator = Coordinator::new();
        assert!(!coordinator.corrupt_index());
        coordinator.set_corrupt_index();
        assert!(coordinator.corrupt_index());
        coordinator.set_corrupt_index();
        assert!(coordinator.corrupt_index());
    }

    #[test]
    fn cancel_readers_flags_live_instances_and_clears_registry() {
        let coordinator = Coordinator::new();
        let a = shared();
        let b = shared();
        coordinator.register(Arc::downgrade(&a));
        coordinator.register(Arc::downgrade(&b));

        coordinator.cancel_readers();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert_eq!(coordinator.registered_count(), 0);
    }

    #[test]
    fn dead_instances_drop_out_of_the_registry() {
        let coordinator = Coordinator::new();
        {
            let transient = shared();
            coordinator.register(Arc::downgrade(&transient));
            assert_eq!(coordinator.registered_count(), 1);
        }
        assert_eq!(coordinator.registered_count(), 0);
    }

    #[test]
    fn memory_check_recovers_after_cache_clear() {
        let coordinator = Coordinator::with_probe(Box::new(ScriptedProbe::new([0.1, 0.6])));
        let a = shared();
        coordinator.register(Arc::downgrade(&a));
        a.store.lock().put(
            0,
            Arc::new(
                crate::cache::TileBuilder::new(
                    0,
                    0,
                    1000,
                    20,
                    &tessella_core::CacheConfig::default(),
                    1,
                )
                .into_tile(),
            ),
        );

        assert!(coordinator.check_memory());
        // Recovery cleared the caches on the way.
        assert!(a.store.lock().is_empty());
    }

    #[test]
    fn memory_check_fails_when_pressure_persists() {
        let coordinator = Coordinator::with_probe(Box::new(ScriptedProbe::new([0.1, 0.15])));
        assert!(!coordinator.check_memory());
    }

    #[test]
    fn visibility_broadcast_applies_hysteresis_per_instance() {
        let coordinator = Coordinator::new();
        let a = shared();
        coordinator.register(Arc::downgrade(&a));

        coordinator.visibility_window_changed(20.0); // within band
        assert_eq!(a.tile_size(), 16_000);
        coordinator.visibility_window_changed(64.0); // rebuild
        assert_eq!(a.tile_size(), 64_000);
    }
}
