//! Single-pass iterator over the concatenated, sorted tile records.

use crate::sam::Alignment;
use std::sync::Arc;

/// Yields records overlapping the query interval: `start < query.end`
/// and `end > query.start`. Non-restartable; does not own the tiles the
/// records came from.
pub struct TiledIterator {
    alignments: Vec<Arc<Alignment>>,
    position: usize,
    query_start: i64,
    query_end: i64,
}

impl TiledIterator {
    /// `alignments` must be sorted by start position.
    pub(crate) fn new(alignments: Vec<Arc<Alignment>>, query_start: i64, query_end: i64) -> Self {
        Self {
            alignments,
            position: 0,
            query_start,
            query_end,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), 0, 0)
    }

    /// No-op; the iterator holds no resources.
    pub fn close(&mut self) {}
}

impl Iterator for TiledIterator {
    type Item = Arc<Alignment>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.position < self.alignments.len() {
            let record = &self.alignments[self.position];
            // Sorted by start, so the first record at or past the query
            // end exhausts the iterator.
            if record.start >= self.query_end {
                self.position = self.alignments.len();
                return None;
            }
            self.position += 1;
            if record.end > self.query_start {
                return Some(Arc::clone(record));
            }
        }
        None
    }
}
