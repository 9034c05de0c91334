//! Splice-junction summaries extracted from spliced reads.

use crate::sam::Alignment;
use std::collections::HashMap;

/// One intron observed in the loaded region, with the number of spliced
/// reads supporting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpliceJunctionFeature {
    pub start: i64,
    pub end: i64,
    pub read_count: u32,
}

/// Accumulates junctions record by record; `finish` freezes them into a
/// sorted feature list.
#[derive(Debug, Default)]
pub struct SpliceJunctionHelper {
    junctions: HashMap<(i64, i64), u32>,
    features: Vec<SpliceJunctionFeature>,
}

impl SpliceJunctionHelper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, alignment: &Alignment) {
        for &(gap_start, gap_end) in &alignment.gap_blocks {
            *self.junctions.entry((gap_start, gap_end)).or_insert(0) += 1;
        }
    }

    pub fn finish(&mut self) {
        let mut features: Vec<SpliceJunctionFeature> = self
            .junctions
            .drain()
            .map(|((start, end), read_count)| SpliceJunctionFeature {
                start,
                end,
                read_count,
            })
            .collect();
        features.sort_by_key(|f| (f.start, f.end));
        self.features = features;
    }

    pub fn features(&self) -> &[SpliceJunctionFeature] {
        &self.features
    }

    pub fn into_features(self) -> Vec<SpliceJunctionFeature> {
        self.features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_support_per_junction() {
        let mut helper = SpliceJunctionHelper::new();
        helper.add(&Alignment::new("r1", 100, 400).with_gap(150, 350));
        helper.add(&Alignment::new("r2", 120, 420).with_gap(150, 350));
        helper.add(&Alignment::new("r3", 100, 500).with_gap(200, 450));
        helper.finish();

        let features = helper.features();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].start, 150);
        assert_eq!(features[0].read_count, 2);
        assert_eq!(features[1].start, 200);
        assert_eq!(features[1].read_count, 1);
    }

    #[test]
    fn unspliced_reads_add_nothing() {
        let mut helper = SpliceJunctionHelper::new();
        helper.add(&Alignment::new("r1", 100, 200));
        helper.finish();
        assert!(helper.features().is_empty());
    }
}
