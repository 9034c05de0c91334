//! Configuration snapshot for the alignment cache
//!
//! A `CacheConfig` is a plain value passed in by the host application for
//! each load; the cache itself never reads preferences from the
//! environment.

use crate::TessellaError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Cytosine context used by bisulfite-mode coverage counting. Passed
/// through to the counts aggregator untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BisulfiteContext {
    #[default]
    None,
    Cg,
    Chg,
    Chh,
}

/// Read-group exclusion filter. A record whose read group appears in the
/// excluded set is dropped before counting and sampling.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReadGroupFilter {
    pub excluded_read_groups: HashSet<String>,
}

impl ReadGroupFilter {
    pub fn new(excluded: impl IntoIterator<Item = String>) -> Self {
        Self {
            excluded_read_groups: excluded.into_iter().collect(),
        }
    }

    /// True if a record carrying this read group should be rejected.
    /// Records without a read group always pass.
    pub fn excludes(&self, read_group: Option<&str>) -> bool {
        match read_group {
            Some(rg) => self.excluded_read_groups.contains(rg),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Visibility window in kilobases; drives the tile size.
    #[serde(default = "default_max_visible_range_kb")]
    pub max_visible_range_kb: f32,
    /// Drop reads flagged as vendor quality-check failures.
    #[serde(default = "default_filter_failed_reads")]
    pub filter_failed_reads: bool,
    /// Keep optical/PCR duplicates.
    #[serde(default)]
    pub show_duplicates: bool,
    /// Minimum mapping quality; records below it are dropped.
    #[serde(default)]
    pub quality_threshold: u8,
    /// Collect splice-junction summaries while loading.
    #[serde(default)]
    pub show_junction_track: bool,
    #[serde(default = "default_min_insert_size_percentile")]
    pub min_insert_size_percentile: f64,
    #[serde(default = "default_max_insert_size_percentile")]
    pub max_insert_size_percentile: f64,
    #[serde(default)]
    pub read_group_filter: Option<ReadGroupFilter>,
    #[serde(default)]
    pub bisulfite_context: BisulfiteContext,
}

// Default value functions
fn default_max_visible_range_kb() -> f32 {
    16.0
}
fn default_filter_failed_reads() -> bool {
    true
}
fn default_min_insert_size_percentile() -> f64 {
    0.5
}
fn default_max_insert_size_percentile() -> f64 {
    99.5
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_visible_range_kb: default_max_visible_range_kb(),
            filter_failed_reads: default_filter_failed_reads(),
            show_duplicates: false,
            quality_threshold: 0,
            show_junction_track: false,
            min_insert_size_percentile: default_min_insert_size_percentile(),
            max_insert_size_percentile: default_max_insert_size_percentile(),
            read_group_filter: None,
            bisulfite_context: BisulfiteContext::None,
        }
    }
}

impl CacheConfig {
    /// Check internal consistency of the snapshot.
    pub fn validate(&self) -> Result<(), TessellaError> {
        if self.max_visible_range_kb <= 0.0 {
            return Err(TessellaError::Configuration(format!(
                "max_visible_range_kb must be positive, got {}",
                self.max_visible_range_kb
            )));
        }
        let (lo, hi) = (
            self.min_insert_size_percentile,
            self.max_insert_size_percentile,
        );
        if !(0.0..=100.0).contains(&lo) || !(0.0..=100.0).contains(&hi) || lo > hi {
            return Err(TessellaError::Configuration(format!(
                "insert-size percentiles out of range: {lo}..{hi}"
            )));
        }
        Ok(())
    }
}

/// Load a configuration snapshot from a JSON file.
pub fn load_config(path: &Path) -> Result<CacheConfig, TessellaError> {
    let contents = std::fs::read_to_string(path)?;
    let config: CacheConfig = serde_json::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

/// Save a configuration snapshot to a JSON file.
pub fn save_config(config: &CacheConfig, path: &Path) -> Result<(), TessellaError> {
    let contents = serde_json::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_visible_range_kb, 16.0);
        assert!(config.filter_failed_reads);
        assert!(!config.show_duplicates);
    }

    #[test]
    fn rejects_bad_percentiles() {
        let config = CacheConfig {
            min_insert_size_percentile: 80.0,
            max_insert_size_percentile: 20.0,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_window() {
        let config = CacheConfig {
            max_visible_range_kb: 0.0,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn read_group_filter_excludes() {
        let filter = ReadGroupFilter::new(["bad_rg".to_string()]);
        assert!(filter.excludes(Some("bad_rg")));
        assert!(!filter.excludes(Some("good_rg")));
        assert!(!filter.excludes(None));
    }

    #[test]
    fn round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = CacheConfig::default();
        config.show_junction_track = true;
        config.quality_threshold = 20;
        save_config(&config, &path).unwrap();
        let loaded = load_config(&path).unwrap();
        assert!(loaded.show_junction_track);
        assert_eq!(loaded.quality_threshold, 20);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: CacheConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_visible_range_kb, 16.0);
        assert_eq!(config.min_insert_size_percentile, 0.5);
        assert_eq!(config.max_insert_size_percentile, 99.5);
    }
}
