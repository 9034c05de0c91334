//! A single mapped sequencing read, as consumed by the tile cache.
//!
//! The cache treats records as value objects produced by the upstream
//! reader. Records fan out to every tile they overlap as `Arc<Alignment>`,
//! so the one mutable slot (the reconstructed mate sequence) is a
//! write-once cell that later writes can reach through shared handles.

use std::sync::OnceLock;

/// Mate placement for a paired-end record.
#[derive(Debug, Clone, Copy)]
pub struct MateInfo {
    pub mapped: bool,
    pub start: i64,
}

/// Opaque header handed through from the underlying reader.
#[derive(Debug, Clone, Default)]
pub struct AlignmentHeader {
    pub text: String,
}

/// One aligned read. Coordinates are 0-based, `end` exclusive.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub read_name: String,
    pub start: i64,
    pub end: i64,
    pub mapping_quality: u8,
    pub paired: bool,
    pub mapped: bool,
    pub duplicate: bool,
    pub vendor_failed: bool,
    pub proper_pair: bool,
    pub read_sequence: String,
    pub library: Option<String>,
    pub read_group: Option<String>,
    /// Template length as reported by the aligner; 0 when unknown.
    pub insert_size: i64,
    pub mate: Option<MateInfo>,
    /// Skipped reference intervals (introns) within `[start, end)`,
    /// sorted and non-overlapping.
    pub gap_blocks: Vec<(i64, i64)>,
    mate_sequence: OnceLock<String>,
}

impl Alignment {
    /// A mapped, unpaired record with default flags. The `with_*`
    /// builders below fill in the rest.
    pub fn new(read_name: impl Into<String>, start: i64, end: i64) -> Self {
        Self {
            read_name: read_name.into(),
            start,
            end,
            mapping_quality: 60,
            paired: false,
            mapped: true,
            duplicate: false,
            vendor_failed: false,
            proper_pair: false,
            read_sequence: String::new(),
            library: None,
            read_group: None,
            insert_size: 0,
            mate: None,
            gap_blocks: Vec::new(),
            mate_sequence: OnceLock::new(),
        }
    }

    pub fn with_mate(mut self, mate_start: i64, mate_mapped: bool) -> Self {
        self.paired = true;
        self.mate = Some(MateInfo {
            mapped: mate_mapped,
            start: mate_start,
        });
        self
    }

    pub fn with_proper_pair(mut self, insert_size: i64) -> Self {
        self.proper_pair = true;
        self.insert_size = insert_size;
        self
    }

    pub fn with_mapping_quality(mut self, quality: u8) -> Self {
        self.mapping_quality = quality;
        self
    }

    pub fn with_unmapped(mut self) -> Self {
        self.mapped = false;
        self
    }

    pub fn with_duplicate(mut self) -> Self {
        self.duplicate = true;
        self
    }

    pub fn with_vendor_failed(mut self) -> Self {
        self.vendor_failed = true;
        self
    }

    pub fn with_sequence(mut self, sequence: impl Into<String>) -> Self {
        self.read_sequence = sequence.into();
        self
    }

    pub fn with_library(mut self, library: impl Into<String>) -> Self {
        self.library = Some(library.into());
        self
    }

    pub fn with_read_group(mut self, read_group: impl Into<String>) -> Self {
        self.read_group = Some(read_group.into());
        self
    }

    pub fn with_gap(mut self, gap_start: i64, gap_end: i64) -> Self {
        self.gap_blocks.push((gap_start, gap_end));
        self
    }

    /// Record the mate's read sequence, reconstructed by the loader.
    /// First write wins; later writes are ignored.
    pub fn set_mate_sequence(&self, sequence: impl Into<String>) {
        let _ = self.mate_sequence.set(sequence.into());
    }

    pub fn mate_sequence(&self) -> Option<&str> {
        self.mate_sequence.get().map(String::as_str)
    }

    /// True when the mate exists and is mapped.
    pub fn mate_mapped(&self) -> bool {
        self.mate.map(|m| m.mapped).unwrap_or(false)
    }

    /// Aligned reference segments: `[start, end)` minus the gap blocks.
    pub fn aligned_blocks(&self) -> Vec<(i64, i64)> {
        if self.gap_blocks.is_empty() {
            return vec![(self.start, self.end)];
        }
        let mut blocks = Vec::with_capacity(self.gap_blocks.len() + 1);
        let mut cursor = self.start;
        for &(gap_start, gap_end) in &self.gap_blocks {
            if gap_start > cursor {
                blocks.push((cursor, gap_start));
            }
            cursor = gap_end;
        }
        if cursor < self.end {
            blocks.push((cursor, self.end));
        }
        blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn aligned_blocks_without_gaps() {
        let a = Alignment::new("r1", 100, 200);
        assert_eq!(a.aligned_blocks(), vec![(100, 200)]);
    }

    #[test]
    fn aligned_blocks_skip_introns() {
        let a = Alignment::new("r1", 100, 400)
            .with_gap(150, 250)
            .with_gap(300, 350);
        assert_eq!(a.aligned_blocks(), vec![(100, 150), (250, 300), (350, 400)]);
    }

    #[test]
    fn mate_sequence_writes_once_through_shared_handles() {
        let a = Arc::new(Alignment::new("r1", 0, 50).with_mate(100, false));
        let b = Arc::clone(&a);
        b.set_mate_sequence("ACGT");
        b.set_mate_sequence("TTTT");
        assert_eq!(a.mate_sequence(), Some("ACGT"));
    }
}
