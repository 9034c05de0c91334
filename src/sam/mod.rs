//! Alignment domain model: records, reader traits, and the per-tile
//! derived artifacts (coverage counts, splice-junction summaries,
//! paired-end insert-size stats).

pub mod alignment;
pub mod counts;
pub mod pe_stats;
pub mod reader;
pub mod splice;

pub use alignment::{Alignment, AlignmentHeader, MateInfo};
pub use counts::AlignmentCounts;
pub use pe_stats::PeStats;
pub use reader::{AlignmentIterator, AlignmentReader};
pub use splice::{SpliceJunctionFeature, SpliceJunctionHelper};
