//! Capability traits for the underlying random-access alignment source.
//!
//! The cache never parses files itself; it drives whatever implements
//! `AlignmentReader`. The contract mirrors an indexed, coordinate-sorted
//! source: `query` takes a 1-based start and yields records overlapping
//! the span in coordinate order.

use crate::sam::{Alignment, AlignmentHeader};
use tessella_core::TessellaResult;

/// A closeable stream of alignment records. Faults from the source are
/// surfaced as `Err` items; a buffer-underflow-class fault must map to
/// `TessellaError::CorruptIndex`.
pub trait AlignmentIterator: Iterator<Item = TessellaResult<Alignment>> {
    /// Release underlying resources. Called on every load exit path;
    /// implementations should also release on drop.
    fn close(&mut self) {}
}

/// Random-access reader over a sorted, indexed alignment file.
pub trait AlignmentReader {
    fn sequence_names(&self) -> Vec<String>;

    fn header(&self) -> &AlignmentHeader;

    fn has_index(&self) -> bool;

    /// Whole-file scan in file order.
    fn iter_all(&mut self) -> TessellaResult<Box<dyn AlignmentIterator + '_>>;

    /// Records overlapping `[start_1based - 1, end)` on `sequence`, in
    /// coordinate order. `contained` restricts to records fully inside
    /// the span.
    fn query(
        &mut self,
        sequence: &str,
        start_1based: i64,
        end: i64,
        contained: bool,
    ) -> TessellaResult<Box<dyn AlignmentIterator + '_>>;

    fn close(&mut self) -> TessellaResult<()>;
}
