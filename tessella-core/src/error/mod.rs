//! Core error types for Tessella

use thiserror::Error;

/// Main error type for Tessella operations
#[derive(Error, Debug)]
pub enum TessellaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    /// Buffer-underflow-class fault from the underlying reader. Almost
    /// always a corrupt index file; latched process-wide once seen.
    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    /// Any other reader fault, wrapped as a fatal data-load error.
    #[error("error loading alignment data: {0}")]
    DataLoad(String),

    #[error("alignment source has no index: {0}")]
    MissingIndex(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("other error: {0}")]
    Other(String),
}

/// Result type alias for Tessella operations
pub type TessellaResult<T> = Result<T, TessellaError>;

// Conversion implementations for common error types
impl From<serde_json::Error> for TessellaError {
    fn from(err: serde_json::Error) -> Self {
        TessellaError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for TessellaError {
    fn from(err: anyhow::Error) -> Self {
        TessellaError::Other(err.to_string())
    }
}
