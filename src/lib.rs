// Tessella - tiled, depth-limited alignment cache for interactive genome viewing
// Global clippy configuration

#![warn(clippy::all)]
#![warn(clippy::correctness)]
#![warn(clippy::suspicious)]
#![warn(clippy::perf)]
// Allow some pedantic lints that don't add value
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]

pub mod cache;
pub mod coordinator;
pub mod sam;

// Re-export the types most callers touch
pub use cache::{AlignmentTile, CachingReader, TileStore, TiledIterator};
pub use coordinator::{Coordinator, MemoryProbe, SystemMemoryProbe};
pub use tessella_core::{
    BisulfiteContext, CacheConfig, ReadGroupFilter, TessellaError, TessellaResult,
};
