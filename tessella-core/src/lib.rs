//! Core types shared across Tessella crates

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{load_config, save_config, BisulfiteContext, CacheConfig, ReadGroupFilter};
pub use error::{TessellaError, TessellaResult};

/// Version information for the Tessella project
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
